//! Per-invocation offload cycle
//!
//! [`OffloadExecutor`] owns the host staging buffers and runs one synchronous device
//! execution per call:
//!
//! ```text
//! host [T] ──encode──► staging (u64) ──copy──► device input
//!                                               │ start
//!                                               ▼ poll DONE
//! host [T] ◄─decode── staging (u64) ◄──copy── device output
//! ```
//!
//! The phases never overlap and the call does not return until results are back on
//! the host.

use crate::error::{Result, ShapeMismatch};
use crate::marshal::{HostElement, StagingBuffer, U64Wire, WireFormat};
use crate::session::DeviceSession;
use crate::shape::Shape;
use crate::wait::{PollStats, SpinPoll, WaitStrategy};
use accel_backends::AcceleratorDriver;
use accel_tracing::performance::record_transfer;
use accel_tracing::{perf_event, perf_span, timed_block};

/// Shape-checked marshal → trigger → poll → unmarshal runner
#[derive(Debug)]
pub struct OffloadExecutor<T, F = U64Wire, W = SpinPoll> {
    input_shape: Shape,
    output_shape: Shape,
    format: F,
    wait: W,
    input_staging: StagingBuffer<T>,
    output_staging: StagingBuffer<T>,
    invocations: u64,
}

impl<T: HostElement> OffloadExecutor<T> {
    /// Executor for the given negotiated shapes, using the 64-bit wire and the default
    /// spin poll
    pub fn new(input_shape: Shape, output_shape: Shape) -> Self {
        Self::with_strategies(input_shape, output_shape, U64Wire, SpinPoll::default())
    }

    /// Executor matching an open session's shapes
    pub fn for_session<D: AcceleratorDriver>(session: &DeviceSession<D>, wait: SpinPoll) -> Self {
        Self::with_strategies(
            session.input_shape().clone(),
            session.output_shape().clone(),
            U64Wire,
            wait,
        )
    }
}

impl<T, F, W> OffloadExecutor<T, F, W>
where
    T: HostElement,
    F: WireFormat<T>,
    W: WaitStrategy,
{
    /// Executor with explicit marshalling and wait strategies
    ///
    /// Staging buffers are allocated here and reused by every call.
    pub fn with_strategies(input_shape: Shape, output_shape: Shape, format: F, wait: W) -> Self {
        let input_staging = StagingBuffer::new(input_shape.numel());
        let output_staging = StagingBuffer::new(output_shape.numel());
        Self {
            input_shape,
            output_shape,
            format,
            wait,
            input_staging,
            output_staging,
            invocations: 0,
        }
    }

    /// Check a caller's input dimensions against the negotiated input shape
    ///
    /// Returns the shape the caller's output container must take.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` naming the rank difference or the first differing dimension.
    pub fn validate_input(&self, actual: &[usize]) -> Result<&Shape> {
        self.input_shape.check(actual).map_err(|mismatch| {
            tracing::debug!(expected = %self.input_shape, actual = ?actual, %mismatch, "input_shape_rejected");
            mismatch
        })?;
        Ok(&self.output_shape)
    }

    /// Negotiated input shape
    pub fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    /// Negotiated output shape
    pub fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    /// Host staging buffer for the input direction
    pub fn input_staging(&self) -> &StagingBuffer<T> {
        &self.input_staging
    }

    /// Host staging buffer for the output direction
    pub fn output_staging(&self) -> &StagingBuffer<T> {
        &self.output_staging
    }

    /// Free both host staging buffers
    ///
    /// The next call to [`execute_into`](Self::execute_into) allocates them again.
    pub fn release_staging(&mut self) {
        self.input_staging.release();
        self.output_staging.release();
        tracing::debug!("host_staging_released");
    }

    /// Completed device executions
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// Run one device execution and return the output elements
    ///
    /// # Errors
    ///
    /// See [`execute_into`](Self::execute_into).
    pub fn execute<D: AcceleratorDriver>(&mut self, session: &mut DeviceSession<D>, input: &[T]) -> Result<Vec<T>> {
        let mut output = vec![T::default(); self.output_shape.numel()];
        self.execute_into(session, input, &mut output)?;
        Ok(output)
    }

    /// Run one device execution, writing results into `output`
    ///
    /// # Arguments
    ///
    /// * `session` - Attached device session
    /// * `input` - Exactly `input_shape().numel()` elements
    /// * `output` - Exactly `output_shape().numel()` elements
    ///
    /// # Errors
    ///
    /// - `ShapeMismatch` if either slice has the wrong length; the device is not touched
    /// - `InvalidState` if the session is not attached
    /// - `DeviceIo` on any copy or register failure; `output` is left unmodified
    /// - `DeviceTimeout` if the wait strategy has a deadline and it passes
    #[tracing::instrument(skip_all, fields(invocation = self.invocations, input_len = input.len()))]
    pub fn execute_into<D: AcceleratorDriver>(
        &mut self,
        session: &mut DeviceSession<D>,
        input: &[T],
        output: &mut [T],
    ) -> Result<PollStats> {
        let (input_numel, output_numel) = (self.input_shape.numel(), self.output_shape.numel());
        if input.len() != input_numel {
            return Err(ShapeMismatch::Elements {
                expected: input_numel,
                actual: input.len(),
            }
            .into());
        }
        if output.len() != output_numel {
            return Err(ShapeMismatch::Elements {
                expected: output_numel,
                actual: output.len(),
            }
            .into());
        }
        session.ensure_attached()?;

        if self.input_staging.len() != input_numel {
            self.input_staging = StagingBuffer::new(input_numel);
        }
        if self.output_staging.len() != output_numel {
            self.output_staging = StagingBuffer::new(output_numel);
        }

        let _span = perf_span!("offload_execute", input_elems = input.len(), output_elems = output.len());

        self.input_staging.load(&self.format, input);

        let (uploaded, upload_us) = timed_block!("copy_in", { session.upload(self.input_staging.as_bytes()) });
        uploaded?;
        record_transfer("host_to_device", self.input_staging.as_bytes().len(), upload_us);

        session.trigger()?;
        let stats = session.wait_for_completion(&self.wait)?;
        perf_event!(
            "device_complete",
            polls = stats.polls,
            elapsed_us = stats.elapsed.as_micros() as u64
        );

        let (downloaded, download_us) = timed_block!("copy_out", { session.download(self.output_staging.as_bytes_mut()) });
        downloaded?;
        record_transfer("device_to_host", self.output_staging.as_bytes().len(), download_us);

        self.output_staging.store(&self.format, output);
        self.invocations += 1;

        tracing::debug!(
            invocation = self.invocations,
            polls = stats.polls,
            elapsed_us = stats.elapsed.as_micros() as u64,
            "offload_complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputAddressPolicy;
    use crate::error::{Error, ErrorKind};
    use accel_backends::{regs, SimFault, SimOp, SimulatedDriver};
    use std::time::Duration;

    fn session(driver: SimulatedDriver, policy: OutputAddressPolicy) -> DeviceSession<SimulatedDriver> {
        DeviceSession::open(
            driver,
            Shape::new(vec![1, 4]).unwrap(),
            Shape::new(vec![1, 2]).unwrap(),
            "load mlp.bit",
            policy,
        )
        .unwrap()
    }

    fn fast_poll() -> SpinPoll {
        SpinPoll::new(Duration::ZERO)
    }

    #[test]
    fn test_validate_input_returns_output_shape() {
        let executor = OffloadExecutor::<f32>::new(Shape::new(vec![1, 4]).unwrap(), Shape::new(vec![1, 2]).unwrap());

        assert_eq!(executor.validate_input(&[1, 4]).unwrap().dims(), &[1, 2]);

        let err = executor.validate_input(&[1, 5]).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch(ShapeMismatch::Dim {
                axis: 1,
                expected: 4,
                actual: 5
            })
        ));

        let err = executor.validate_input(&[4]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(ShapeMismatch::Rank { expected: 2, actual: 1 })));
    }

    #[test]
    fn test_execute_returns_output_length_with_mirrored_address() {
        let mut session = session(SimulatedDriver::new(), OutputAddressPolicy::MirrorInput);
        let mut executor = OffloadExecutor::<f32>::for_session(&session, fast_poll());

        let output = executor.execute(&mut session, &[3.0, 1.0, 4.0, 1.0]).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(executor.invocations(), 1);
    }

    #[test]
    fn test_execute_reads_device_results() {
        let mut session = session(SimulatedDriver::new(), OutputAddressPolicy::OutputBuffer);
        let mut executor = OffloadExecutor::<f32>::for_session(&session, fast_poll());

        let output = executor.execute(&mut session, &[3.0, 1.0, 4.0, 1.0]).unwrap();
        assert_eq!(output, vec![7.0, 2.0]);
    }

    #[test]
    fn test_execute_truncates_fractional_input() {
        let mut session = session(SimulatedDriver::new(), OutputAddressPolicy::OutputBuffer);
        let mut executor = OffloadExecutor::<f32>::for_session(&session, fast_poll());

        let output = executor.execute(&mut session, &[3.9, 1.2, 4.5, 1.99]).unwrap();
        assert_eq!(output, vec![7.0, 2.0]);
    }

    #[test]
    fn test_one_execution_per_call_in_strict_order() {
        let driver = SimulatedDriver::new().with_completion_latency(2);
        let probe = driver.probe();
        let mut session = session(driver, OutputAddressPolicy::OutputBuffer);
        let input = session.input_buffer().unwrap();
        let output = session.output_buffer().unwrap();
        let mut executor = OffloadExecutor::<u32>::for_session(&session, fast_poll());
        let setup_ops = probe.ops().len();

        let mut out = [0u32; 2];
        let stats = executor.execute_into(&mut session, &[1, 2, 3, 4], &mut out).unwrap();
        assert_eq!(stats.polls, 3);
        assert_eq!(probe.status_reads(), 3);
        assert_eq!(out, [4, 6]);
        assert_eq!(probe.executions(), 1);

        let ops = probe.ops().split_off(setup_ops);
        assert_eq!(ops.first(), Some(&SimOp::CopyToDevice { address: input.address(), len: 32 }));
        assert_eq!(
            ops.get(1),
            Some(&SimOp::WriteRegister {
                addr: regs::CONTROL,
                value: u64::from(regs::START)
            })
        );
        assert!(ops[2..ops.len() - 1]
            .iter()
            .all(|op| matches!(op, SimOp::ReadRegister { addr, .. } if *addr == regs::CONTROL)));
        assert_eq!(ops.last(), Some(&SimOp::CopyFromDevice { address: output.address(), len: 16 }));
    }

    #[test]
    fn test_length_mismatch_does_not_touch_device() {
        let driver = SimulatedDriver::new();
        let probe = driver.probe();
        let mut session = session(driver, OutputAddressPolicy::MirrorInput);
        let mut executor = OffloadExecutor::<f32>::for_session(&session, fast_poll());
        let setup_ops = probe.ops().len();

        let err = executor.execute(&mut session, &[1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);

        let mut short = [0.0f32; 1];
        let err = executor.execute_into(&mut session, &[1.0; 4], &mut short).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch(ShapeMismatch::Elements { expected: 2, actual: 1 })
        ));

        assert_eq!(probe.ops().len(), setup_ops);
        assert_eq!(executor.invocations(), 0);
    }

    #[test]
    fn test_copy_fault_is_device_io_and_leaves_output_untouched() {
        let driver = SimulatedDriver::new().with_fault(SimFault::CopyFromDevice);
        let probe = driver.probe();
        let mut session = session(driver, OutputAddressPolicy::OutputBuffer);
        let mut executor = OffloadExecutor::<f32>::for_session(&session, fast_poll());
        let mut output = [-1.0f32; 2];

        let err = executor.execute_into(&mut session, &[1.0; 4], &mut output).unwrap_err();
        assert!(matches!(err, Error::DeviceIo { op: "device-to-host copy", .. }));
        assert_eq!(output, [-1.0, -1.0]);
        assert_eq!(probe.executions(), 1);
        assert_eq!(executor.invocations(), 0);
    }

    #[test]
    fn test_start_fault_is_device_io() {
        let driver = SimulatedDriver::new().with_fault(SimFault::WriteRegister(regs::CONTROL));
        let mut session = session(driver, OutputAddressPolicy::MirrorInput);
        let mut executor = OffloadExecutor::<f32>::for_session(&session, fast_poll());

        let err = executor.execute(&mut session, &[1.0; 4]).unwrap_err();
        assert!(matches!(err, Error::DeviceIo { op: "start", .. }));
    }

    #[test]
    fn test_deadline_bounds_a_stuck_device() {
        let driver = SimulatedDriver::new().never_completes();
        let mut session = session(driver, OutputAddressPolicy::MirrorInput);
        let wait = fast_poll().with_deadline(Duration::from_millis(5));
        let mut executor = OffloadExecutor::<f32>::for_session(&session, wait);

        let err = executor.execute(&mut session, &[1.0; 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_execute_after_teardown_is_invalid_state() {
        let mut session = session(SimulatedDriver::new(), OutputAddressPolicy::MirrorInput);
        let mut executor = OffloadExecutor::<f32>::for_session(&session, fast_poll());
        session.teardown().unwrap();

        let err = executor.execute(&mut session, &[1.0; 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_released_staging_is_reallocated_on_next_call() {
        let mut session = session(SimulatedDriver::new(), OutputAddressPolicy::OutputBuffer);
        let mut executor = OffloadExecutor::<u64>::for_session(&session, fast_poll());

        executor.release_staging();
        assert!(executor.input_staging().is_empty());
        assert!(executor.output_staging().is_empty());

        let output = executor.execute(&mut session, &[3, 1, 4, 1]).unwrap();
        assert_eq!(output, vec![7, 2]);
        assert_eq!(executor.input_staging().len(), 4);
        assert_eq!(executor.output_staging().len(), 2);
    }

    #[test]
    fn test_staging_buffers_are_reused() {
        let mut session = session(SimulatedDriver::new(), OutputAddressPolicy::OutputBuffer);
        let mut executor = OffloadExecutor::<i64>::for_session(&session, fast_poll());

        let first = executor.execute(&mut session, &[1, 1, 1, 1]).unwrap();
        let second = executor.execute(&mut session, &[5, 0, 5, 0]).unwrap();

        assert_eq!(first, vec![2, 2]);
        assert_eq!(second, vec![10, 0]);
        assert_eq!(executor.invocations(), 2);
    }
}
