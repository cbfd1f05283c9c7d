use std::sync::PoisonError;

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Unsupported channel layout: {0} channels, expected 1 to 4")]
    UnsupportedChannelLayout(u32),

    #[error("Device cannot blit or copy images of format {0:?}")]
    UnsupportedFormat(vk::Format),

    #[error("Failed to create a device resource: {0}")]
    DeviceAllocation(vk::Result),

    #[error(transparent)]
    MemoryAllocator(#[from] gpu_allocator::AllocationError),

    #[error("Waiting on the device failed: {0}")]
    DeviceWait(vk::Result),

    #[error(transparent)]
    Vulkan(#[from] vk::Result),

    #[error("No job has been submitted for id {0}")]
    UnknownJobId(u32),

    #[error("A job for id {0} is still in flight")]
    JobInFlight(u32),

    #[error("Job was never submitted")]
    NotSubmitted,

    #[error("Job was already submitted")]
    AlreadySubmitted,

    #[error("Destination holds {actual} bytes, job produces {expected}")]
    DestinationTooSmall { expected: usize, actual: usize },

    #[error("Input holds {actual} bytes, expected {expected}")]
    InputSizeMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Loading(#[from] ash::LoadingError),

    #[error("No suitable physical device has been found")]
    NoSuitableDevice,

    #[error("Poisoned mutex")]
    PoisonError,

    #[error(transparent)]
    Bundle(#[from] dare_bundle::BundleError),
}

impl<T> From<PoisonError<T>> for PreprocessError {
    fn from(_: PoisonError<T>) -> Self {
        PreprocessError::PoisonError
    }
}
