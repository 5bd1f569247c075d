// error.rs — crate-wide error type.
//
// Every fallible operation in the kernel layer returns `RaysResult<T>`.
// Device-runtime failures (allocation, dispatch, transfer) are surfaced as
// values here and are never retried; the frame loop aborts on the first one.

use crate::gpu::device::GpuError;

pub type RaysResult<T> = Result<T, RaysError>;

#[derive(thiserror::Error, Debug)]
pub enum RaysError {
    /// Width, height or supersampling factor out of range.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Argument bound to a kernel does not match the declared signature.
    #[error("binding error in `{entry}`: {msg}")]
    Binding { entry: &'static str, msg: String },

    /// The compiled program does not expose the requested entry point.
    #[error("program has no entry point named `{0}`")]
    UnknownEntry(String),

    /// Flattened scene buffers disagree with the schema the program expects.
    #[error("scene layout error: {0}")]
    SceneLayout(String),

    /// An event in the wait list was not issued by this device.
    #[error("event {seq} of device {device} was not issued by this device")]
    ForeignEvent { device: u64, seq: u64 },

    /// Allocation, compilation or dispatch failed on the device.
    #[error("device error: {0}")]
    Device(String),

    /// A forced device-to-host copy failed.
    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Image(#[from] ::image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RaysError {
    pub fn binding(entry: &'static str, msg: impl Into<String>) -> Self {
        Self::Binding { entry, msg: msg.into() }
    }

    pub fn dimensions(msg: impl Into<String>) -> Self {
        Self::InvalidDimensions(msg.into())
    }

    pub fn layout(msg: impl Into<String>) -> Self {
        Self::SceneLayout(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
