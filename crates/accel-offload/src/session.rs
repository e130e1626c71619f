//! Device session: accelerator connection and scratch buffers
//!
//! A [`DeviceSession`] owns the driver for the whole lifetime of a stage. Opening it
//! attaches the device, loads the executable image, allocates one input and one output
//! buffer sized at the wire width, and programs the one-time configuration registers.
//! Dropping it (or calling [`DeviceSession::teardown`]) frees the buffers and detaches.
//!
//! ```text
//! Uninitialized ──open──► Attached ──teardown/drop──► TornDown
//!       │                                                 ▲
//!       └──────────── bring-up failure ───────────────────┘
//! ```

use crate::config::OutputAddressPolicy;
use crate::error::{Error, Result};
use crate::marshal::WIRE_WIDTH_BYTES;
use crate::shape::Shape;
use crate::wait::{PollStats, WaitStrategy};
use accel_backends::{regs, AcceleratorDriver, BufferHandle, DriverError};

/// Images processed per trigger
pub const IMAGES_PER_TRIGGER: u32 = 1;

/// Lifecycle state of a [`DeviceSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Bring-up in progress
    Uninitialized,
    /// Device attached, buffers allocated, registers programmed
    Attached,
    /// Resources released; no further operations are valid
    TornDown,
}

/// Exclusive connection to an accelerator plus its two scratch buffers
pub struct DeviceSession<D: AcceleratorDriver> {
    driver: D,
    state: SessionState,
    input_shape: Shape,
    output_shape: Shape,
    input_buffer: Option<BufferHandle>,
    output_buffer: Option<BufferHandle>,
    attached: bool,
}

impl<D: AcceleratorDriver> DeviceSession<D> {
    /// Attach the device and configure it for `input_shape` → `output_shape`
    ///
    /// # Errors
    ///
    /// `Configuration`/`DeviceSetup` if sizing, image load, allocation or register
    /// programming fails. Whatever was acquired before the failure is released.
    #[tracing::instrument(skip(driver), fields(input = %input_shape, output = %output_shape))]
    pub fn open(
        driver: D,
        input_shape: Shape,
        output_shape: Shape,
        image_load_cmd: &str,
        output_address: OutputAddressPolicy,
    ) -> Result<Self> {
        let mut session = Self {
            driver,
            state: SessionState::Uninitialized,
            input_shape,
            output_shape,
            input_buffer: None,
            output_buffer: None,
            attached: false,
        };

        if let Err(err) = session.bring_up(image_load_cmd, output_address) {
            tracing::error!(error = %err, "device_bring_up_failed");
            if let Err(cleanup) = session.release() {
                tracing::warn!(error = %cleanup, "partial_bring_up_cleanup_failed");
            }
            session.state = SessionState::TornDown;
            return Err(err);
        }

        session.state = SessionState::Attached;
        tracing::info!(
            image = image_load_cmd,
            input_bytes = session.input_bytes(),
            output_bytes = session.output_bytes(),
            "device_session_attached"
        );
        Ok(session)
    }

    fn bring_up(&mut self, image_load_cmd: &str, output_address: OutputAddressPolicy) -> Result<()> {
        let input_bytes = self.input_shape.byte_len(WIRE_WIDTH_BYTES)?;
        let output_bytes = self.output_shape.byte_len(WIRE_WIDTH_BYTES)?;

        self.driver.attach(image_load_cmd).map_err(setup_step("attach"))?;
        self.attached = true;

        let input = self
            .driver
            .alloc_buffer(input_bytes)
            .map_err(setup_step("allocate input buffer"))?;
        self.input_buffer = Some(input);

        let output = self
            .driver
            .alloc_buffer(output_bytes)
            .map_err(setup_step("allocate output buffer"))?;
        self.output_buffer = Some(output);

        self.driver
            .write_register(regs::IMAGE_COUNT, IMAGES_PER_TRIGGER)
            .map_err(setup_step("program image count"))?;
        self.driver
            .write_register_64(regs::INPUT_ADDR, input.address())
            .map_err(setup_step("program input address"))?;

        let output_slot = match output_address {
            OutputAddressPolicy::MirrorInput => {
                tracing::warn!(
                    input = %input,
                    output = %output,
                    "output address register programmed with the input buffer address"
                );
                input
            }
            OutputAddressPolicy::OutputBuffer => output,
        };
        self.driver
            .write_register_64(regs::OUTPUT_ADDR, output_slot.address())
            .map_err(setup_step("program output address"))?;

        tracing::debug!(
            input = %input,
            output = %output,
            output_slot = %output_slot,
            "device_registers_programmed"
        );
        Ok(())
    }

    /// Free whatever was acquired, then detach. Keeps going past failures and reports
    /// the first one.
    fn release(&mut self) -> Result<()> {
        let mut first_err = None;

        for (op, slot) in [
            ("free input buffer", &mut self.input_buffer),
            ("free output buffer", &mut self.output_buffer),
        ] {
            if let Some(handle) = slot.take() {
                match self.driver.free_buffer(handle) {
                    Ok(()) => tracing::debug!(buffer = %handle, "accelerator_buffer_freed"),
                    Err(source) => {
                        tracing::warn!(buffer = %handle, error = %source, "accelerator_buffer_free_failed");
                        first_err.get_or_insert(Error::DeviceIo { op, source });
                    }
                }
            }
        }

        if self.attached {
            self.attached = false;
            if let Err(source) = self.driver.detach() {
                tracing::warn!(error = %source, "device_detach_failed");
                first_err.get_or_insert(Error::DeviceIo { op: "detach", source });
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Free both accelerator buffers and detach the device
    ///
    /// Safe to call more than once; calls after the first are no-ops.
    pub fn teardown(&mut self) -> Result<()> {
        if self.state == SessionState::TornDown {
            tracing::debug!("device_session_already_torn_down");
            return Ok(());
        }

        let result = self.release();
        self.state = SessionState::TornDown;
        tracing::info!(clean = result.is_ok(), "device_session_torn_down");
        result
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated input shape
    pub fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    /// Negotiated output shape
    pub fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    /// Size of the input buffer in bytes
    pub fn input_bytes(&self) -> usize {
        self.input_shape.numel() * WIRE_WIDTH_BYTES
    }

    /// Size of the output buffer in bytes
    pub fn output_bytes(&self) -> usize {
        self.output_shape.numel() * WIRE_WIDTH_BYTES
    }

    /// Accelerator input buffer
    pub fn input_buffer(&self) -> Result<BufferHandle> {
        self.ensure_attached()?;
        self.input_buffer.ok_or(Error::InvalidState {
            expected: SessionState::Attached,
            actual: self.state,
        })
    }

    /// Accelerator output buffer
    pub fn output_buffer(&self) -> Result<BufferHandle> {
        self.ensure_attached()?;
        self.output_buffer.ok_or(Error::InvalidState {
            expected: SessionState::Attached,
            actual: self.state,
        })
    }

    /// Underlying driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Fail unless the session is attached
    pub fn ensure_attached(&self) -> Result<()> {
        if self.state == SessionState::Attached {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected: SessionState::Attached,
                actual: self.state,
            })
        }
    }

    /// Copy `bytes` into the accelerator input buffer
    pub fn upload(&mut self, bytes: &[u8]) -> Result<()> {
        let input = self.input_buffer()?;
        self.driver
            .copy_host_to_device(bytes, input)
            .map_err(io_step("host-to-device copy"))
    }

    /// Start one device run
    pub fn trigger(&mut self) -> Result<()> {
        self.ensure_attached()?;
        self.driver
            .write_register(regs::CONTROL, regs::START)
            .map_err(io_step("start"))
    }

    /// Block until the device reports completion
    pub fn wait_for_completion<W: WaitStrategy>(&mut self, wait: &W) -> Result<PollStats> {
        self.ensure_attached()?;
        wait.wait_for_completion(&mut self.driver)
    }

    /// Copy the accelerator output buffer into `bytes`
    pub fn download(&mut self, bytes: &mut [u8]) -> Result<()> {
        let output = self.output_buffer()?;
        self.driver
            .copy_device_to_host(output, bytes)
            .map_err(io_step("device-to-host copy"))
    }
}

impl<D: AcceleratorDriver> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            tracing::warn!(error = %err, "device_session_teardown_failed_on_drop");
        }
    }
}

impl<D: AcceleratorDriver> std::fmt::Debug for DeviceSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &self.state)
            .field("input_shape", &self.input_shape)
            .field("output_shape", &self.output_shape)
            .field("input_buffer", &self.input_buffer)
            .field("output_buffer", &self.output_buffer)
            .finish()
    }
}

fn setup_step(step: &'static str) -> impl FnOnce(DriverError) -> Error {
    move |source| Error::DeviceSetup { step, source }
}

fn io_step(op: &'static str) -> impl FnOnce(DriverError) -> Error {
    move |source| Error::DeviceIo { op, source }
}
