use ash::vk;

/// Structured error type for the cache/pool/dependency subsystems.
///
/// Call sites outside this crate that only need a single catch-all error type should prefer
/// `anyhow::Result` (as the rest of the device/resource/command plumbing already does); this
/// type exists so callers that need to distinguish error kinds programmatically (for example,
/// deciding whether a failed `ObjectCache::get` is retryable) have something to match on.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("gpu allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("unrecognized or unsupported create-info structure type")]
    UnsupportedCreateInfo,

    #[error("wrong number of handles passed for this create-info tag: expected {expected}, got {actual}")]
    HandleCountMismatch { expected: usize, actual: usize },

    #[error("descriptor pool exhausted: no block could satisfy the requested layout")]
    DescriptorPoolExhausted,

    #[error("resource belongs to a different device/context than the one performing this operation")]
    CrossContextReference,

    #[error("dependency object received a wait injection with no matching signal")]
    UnmatchedWait,
}

pub type Result<T> = std::result::Result<T, Error>;
