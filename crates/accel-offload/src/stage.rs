//! Pipeline stage adapter
//!
//! [`OffloadStage`] presents the session and executor through the two-phase contract a
//! host pipeline expects: construct once with [`setup`](OffloadStage::setup), then
//! [`reshape`](OffloadStage::reshape) and [`forward`](OffloadStage::forward) per step.
//! Gradients are not supported.

use crate::config::OffloadConfig;
use crate::error::{Error, Result, ShapeMismatch};
use crate::executor::OffloadExecutor;
use crate::marshal::HostElement;
use crate::session::DeviceSession;
use crate::shape::element_count;
use crate::wait::{PollStats, SpinPoll};
use accel_backends::AcceleratorDriver;

// ============================================================================
// Blob
// ============================================================================

/// Host tensor: dimensions plus contiguous row-major data
#[derive(Debug, Clone, PartialEq)]
pub struct Blob<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: HostElement> Blob<T> {
    /// Blob over existing data
    ///
    /// # Errors
    ///
    /// - `Configuration` if the element count of `shape` overflows
    /// - `ShapeMismatch` if `data.len()` is not the product of `shape`
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let expected = checked_numel(&shape)?;
        if data.len() != expected {
            return Err(ShapeMismatch::Elements {
                expected,
                actual: data.len(),
            }
            .into());
        }
        Ok(Self { shape, data })
    }

    /// Zero-filled blob
    ///
    /// # Errors
    ///
    /// `Configuration` if the element count of `shape` overflows.
    pub fn zeros(shape: Vec<usize>) -> Result<Self> {
        let data = vec![T::default(); checked_numel(&shape)?];
        Ok(Self { shape, data })
    }

    /// Dimensions
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Element count
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Elements
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Mutable elements
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Change dimensions, resizing the data. Existing elements are kept up to the new
    /// length; new ones are zero.
    ///
    /// # Errors
    ///
    /// `Configuration` if the element count of `shape` overflows; the blob is unchanged.
    pub fn reshape(&mut self, shape: &[usize]) -> Result<()> {
        if self.shape != shape {
            let numel = checked_numel(shape)?;
            self.shape = shape.to_vec();
            self.data.resize(numel, T::default());
        }
        Ok(())
    }
}

fn checked_numel(shape: &[usize]) -> Result<usize> {
    element_count(shape)
        .ok_or_else(|| Error::configuration(format!("element count of blob shape {shape:?} overflows")))
}

// ============================================================================
// Stage
// ============================================================================

/// Pipeline stage that runs its forward step on an accelerator
#[derive(Debug)]
pub struct OffloadStage<D: AcceleratorDriver, T> {
    session: DeviceSession<D>,
    executor: OffloadExecutor<T>,
}

impl<D: AcceleratorDriver, T: HostElement> OffloadStage<D, T> {
    /// Validate `config`, bring the device up and allocate staging buffers
    ///
    /// # Errors
    ///
    /// - `NotImplemented` for narrow precision modes
    /// - `Configuration`/`DeviceSetup` if the parameters are invalid or bring-up fails
    #[tracing::instrument(skip_all, fields(image = %config.bitfile_load_cmd))]
    pub fn setup(config: &OffloadConfig, driver: D) -> Result<Self> {
        let (input_shape, output_shape) = config.validate()?;
        let session = DeviceSession::open(
            driver,
            input_shape,
            output_shape,
            &config.bitfile_load_cmd,
            config.output_address,
        )?;
        let executor = OffloadExecutor::for_session(&session, SpinPoll::from(config.poll));

        tracing::info!(
            input = %session.input_shape(),
            output = %session.output_shape(),
            interval_us = config.poll.interval_us,
            timeout_ms = ?config.poll.timeout_ms,
            "offload_stage_ready"
        );
        Ok(Self { session, executor })
    }

    /// Check `bottom` against the negotiated input shape and size `top` for the output
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` naming the rank or first differing dimension.
    pub fn reshape(&self, bottom: &Blob<T>, top: &mut Blob<T>) -> Result<()> {
        let output_shape = self.executor.validate_input(bottom.shape())?;
        top.reshape(output_shape.dims())
    }

    /// Run `bottom` through the device, writing the result into `top`
    ///
    /// `top` takes the output shape on success. On failure it is left as it was.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch`, `InvalidState`, `DeviceIo`, or `DeviceTimeout`; see
    /// [`OffloadExecutor::execute_into`].
    pub fn forward(&mut self, bottom: &Blob<T>, top: &mut Blob<T>) -> Result<PollStats> {
        let top_fits = top.shape() == self.executor.validate_input(bottom.shape())?.dims();
        if top_fits {
            return self
                .executor
                .execute_into(&mut self.session, bottom.data(), top.data_mut());
        }

        let mut output = vec![T::default(); self.executor.output_shape().numel()];
        let stats = self
            .executor
            .execute_into(&mut self.session, bottom.data(), &mut output)?;
        top.shape = self.executor.output_shape().dims().to_vec();
        top.data = output;
        Ok(stats)
    }

    /// Gradient computation is not supported
    ///
    /// # Errors
    ///
    /// Always `NotImplemented`; no blob is touched.
    pub fn backward(&mut self, _top: &Blob<T>, _propagate_down: &[bool], _bottom: &mut Blob<T>) -> Result<()> {
        tracing::error!("backward requested on offload stage");
        Err(Error::not_implemented("backward pass of an offload stage"))
    }

    /// Release the device and the host staging buffers. Idempotent; also runs on drop.
    pub fn teardown(&mut self) -> Result<()> {
        let result = self.session.teardown();
        self.executor.release_staging();
        result
    }

    /// Device session
    pub fn session(&self) -> &DeviceSession<D> {
        &self.session
    }

    /// Executor
    pub fn executor(&self) -> &OffloadExecutor<T> {
        &self.executor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputAddressPolicy;
    use crate::error::ErrorKind;
    use crate::session::SessionState;
    use accel_backends::SimulatedDriver;

    fn config() -> OffloadConfig {
        OffloadConfig::new(vec![1, 4], vec![1, 2], "load mlp.bit")
    }

    #[test]
    fn test_blob_new_checks_length() {
        assert!(Blob::new(vec![2, 2], vec![1.0f32; 4]).is_ok());
        let err = Blob::new(vec![2, 2], vec![1.0f32; 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ShapeMismatch);
    }

    #[test]
    fn test_blob_reshape_resizes() {
        let mut blob = Blob::new(vec![4], vec![1u32, 2, 3, 4]).unwrap();
        blob.reshape(&[1, 2]).unwrap();
        assert_eq!(blob.shape(), &[1, 2]);
        assert_eq!(blob.data(), &[1, 2]);

        blob.reshape(&[3]).unwrap();
        assert_eq!(blob.data(), &[1, 2, 0]);
        assert_eq!(blob.numel(), 3);
    }

    #[test]
    fn test_blob_rejects_overflowing_shape() {
        let err = Blob::<f32>::new(vec![usize::MAX, 2], vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err = Blob::<f32>::zeros(vec![usize::MAX, 2]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let mut blob = Blob::new(vec![2], vec![1u8, 2]).unwrap();
        assert!(blob.reshape(&[usize::MAX, usize::MAX]).is_err());
        assert_eq!(blob.shape(), &[2]);
        assert_eq!(blob.data(), &[1, 2]);
    }

    #[test]
    fn test_reshape_sizes_top() {
        let stage = OffloadStage::<_, f32>::setup(&config(), SimulatedDriver::new()).unwrap();
        let bottom = Blob::zeros(vec![1, 4]).unwrap();
        let mut top = Blob::zeros(vec![7]).unwrap();

        stage.reshape(&bottom, &mut top).unwrap();
        assert_eq!(top.shape(), &[1, 2]);
    }

    #[test]
    fn test_reshape_rejects_wrong_bottom() {
        let stage = OffloadStage::<_, f32>::setup(&config(), SimulatedDriver::new()).unwrap();
        let mut top = Blob::zeros(vec![1, 2]).unwrap();

        let err = stage.reshape(&Blob::zeros(vec![1, 5]).unwrap(), &mut top).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(ShapeMismatch::Dim { axis: 1, .. })));
        let err = stage.reshape(&Blob::zeros(vec![4]).unwrap(), &mut top).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(ShapeMismatch::Rank { .. })));
    }

    #[test]
    fn test_forward_produces_output() {
        let config = config().with_output_address(OutputAddressPolicy::OutputBuffer);
        let mut stage = OffloadStage::setup(&config, SimulatedDriver::new()).unwrap();
        let bottom = Blob::new(vec![1, 4], vec![3.0f64, 1.0, 4.0, 1.0]).unwrap();
        let mut top = Blob::zeros(vec![0]).unwrap();

        let stats = stage.forward(&bottom, &mut top).unwrap();
        assert!(stats.polls >= 1);
        assert_eq!(top.shape(), &[1, 2]);
        assert_eq!(top.data(), &[7.0, 2.0]);
    }

    #[test]
    fn test_failed_forward_leaves_top_untouched() {
        let config = config().with_output_address(OutputAddressPolicy::OutputBuffer);
        let driver = SimulatedDriver::new().with_fault(accel_backends::SimFault::CopyFromDevice);
        let mut stage = OffloadStage::setup(&config, driver).unwrap();
        let bottom = Blob::new(vec![1, 4], vec![3.0f32, 1.0, 4.0, 1.0]).unwrap();

        let mut resized = Blob::new(vec![7], vec![5.0; 7]).unwrap();
        let err = stage.forward(&bottom, &mut resized).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceIo);
        assert_eq!(resized.shape(), &[7]);
        assert_eq!(resized.data(), &[5.0; 7]);

        let mut fitted = Blob::new(vec![1, 2], vec![-1.0, -1.0]).unwrap();
        stage.forward(&bottom, &mut fitted).unwrap_err();
        assert_eq!(fitted.data(), &[-1.0, -1.0]);
    }

    #[test]
    fn test_teardown_releases_host_staging() {
        let mut stage = OffloadStage::<_, f32>::setup(&config(), SimulatedDriver::new()).unwrap();
        assert_eq!(stage.executor().input_staging().len(), 4);

        stage.teardown().unwrap();
        assert!(stage.executor().input_staging().is_empty());
        assert!(stage.executor().output_staging().is_empty());
    }

    #[test]
    fn test_backward_always_fails() {
        let mut stage = OffloadStage::<_, f32>::setup(&config(), SimulatedDriver::new()).unwrap();
        let top = Blob::zeros(vec![1, 2]).unwrap();
        let mut bottom = Blob::new(vec![1, 4], vec![9.0; 4]).unwrap();

        let err = stage.backward(&top, &[true], &mut bottom).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
        assert_eq!(bottom.data(), &[9.0; 4]);
    }

    #[test]
    fn test_setup_rejects_narrow_precision() {
        let mut config = config();
        config.use_8bit_input = true;
        let driver = SimulatedDriver::new();
        let probe = driver.probe();

        let err = OffloadStage::<_, f32>::setup(&config, driver).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
        assert!(probe.ops().is_empty());
    }

    #[test]
    fn test_teardown_then_forward_fails() {
        let mut stage = OffloadStage::<_, f32>::setup(&config(), SimulatedDriver::new()).unwrap();
        stage.teardown().unwrap();
        stage.teardown().unwrap();
        assert_eq!(stage.session().state(), SessionState::TornDown);

        let mut top = Blob::zeros(vec![1, 2]).unwrap();
        let err = stage.forward(&Blob::zeros(vec![1, 4]).unwrap(), &mut top).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }
}
