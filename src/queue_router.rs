//! Maps a resource access mask to the `(family, queue)` pair that should perform it, and
//! classifies whether moving an access from one family to another needs an ownership transfer.
//!
//! Grounded on this crate's own [`crate::device`] queue selection (`QUEUE_FAMILY_INDEX_GRAPHICS`,
//! `QueueFamily::supports_compute`/`supports_transfer` in `lib.rs`) and on the
//! `vk::QUEUE_FAMILY_IGNORED` ownership-transfer pattern `zangfx`'s Vulkan backend uses in
//! `cmd/buffer/patch.rs` to skip a barrier's queue-family fields when no transfer is required.

use ash::vk;

/// One of the three queues a [`crate::dependency::DependencyObject`] can route an access to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

/// `(family, queue)` pair identifying a specific hardware queue a command buffer is submitted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueRoute {
    pub kind: QueueKind,
    pub family: u32,
    pub queue: u32,
}

/// Access-mask modifiers this crate treats as "prefer the async compute/transfer queue" hints,
/// separate from the access/read-write bits themselves. A real caller derives these from its own
/// higher-level access-mask type; this router only needs to know which of the three applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsyncHint {
    AsyncCompute,
    AsyncTransfer,
    None,
}

/// §4.6: async-compute routes to the compute family, async-transfer to the transfer family,
/// everything else to graphics.
pub fn route(hint: AsyncHint, graphics: QueueRoute, compute: QueueRoute, transfer: QueueRoute) -> QueueRoute {
    match hint {
        AsyncHint::AsyncCompute => compute,
        AsyncHint::AsyncTransfer => transfer,
        AsyncHint::None => graphics,
    }
}

/// Whether moving a resource access from `src` to `dst` requires a queue-family ownership
/// transfer (a release barrier on `src` paired with an acquire barrier on `dst`), or whether
/// `vk::QUEUE_FAMILY_IGNORED` can be used because the two routes are the same family, the
/// resource is exempt (shared/concurrent-mode memory, or the access discards prior contents).
pub fn needs_ownership_transfer(src: QueueRoute, dst: QueueRoute, concurrent: bool, discard: bool) -> bool {
    if concurrent || discard {
        return false;
    }
    src.family != dst.family
}

/// The queue-family indices to place in a barrier's `src_queue_family_index`/
/// `dst_queue_family_index` fields, given whether an ownership transfer applies.
pub fn barrier_family_indices(src: QueueRoute, dst: QueueRoute, transfer: bool) -> (u32, u32) {
    if transfer {
        (src.family, dst.family)
    } else {
        (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
    }
}

/// Whether `access` includes a host-side read or write, which forces a barrier at `prepare` time
/// (a "host flush") rather than deferring everything to `catch`, since the host isn't a queue
/// that can wait on a semaphore.
pub fn needs_host_flush(access: vk::AccessFlags2, source_writes: bool) -> bool {
    source_writes
        && access.intersects(vk::AccessFlags2::HOST_READ | vk::AccessFlags2::HOST_WRITE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(kind: QueueKind, family: u32) -> QueueRoute {
        QueueRoute { kind, family, queue: 0 }
    }

    #[test]
    fn async_compute_hint_routes_to_compute() {
        let graphics = route(QueueKind::Graphics, 0);
        let compute = route(QueueKind::Compute, 1);
        let transfer = route(QueueKind::Transfer, 2);
        let chosen = super::route(AsyncHint::AsyncCompute, graphics, compute, transfer);
        assert_eq!(chosen.kind, QueueKind::Compute);
    }

    #[test]
    fn no_hint_routes_to_graphics() {
        let graphics = route(QueueKind::Graphics, 0);
        let compute = route(QueueKind::Compute, 1);
        let transfer = route(QueueKind::Transfer, 2);
        let chosen = super::route(AsyncHint::None, graphics, compute, transfer);
        assert_eq!(chosen.kind, QueueKind::Graphics);
    }

    #[test]
    fn same_family_never_needs_transfer() {
        let a = route(QueueKind::Graphics, 0);
        let b = route(QueueKind::Graphics, 0);
        assert!(!needs_ownership_transfer(a, b, false, false));
    }

    #[test]
    fn cross_family_needs_transfer_unless_concurrent_or_discard() {
        let a = route(QueueKind::Graphics, 0);
        let b = route(QueueKind::Compute, 1);
        assert!(needs_ownership_transfer(a, b, false, false));
        assert!(!needs_ownership_transfer(a, b, true, false));
        assert!(!needs_ownership_transfer(a, b, false, true));
    }

    #[test]
    fn ignored_family_indices_used_without_transfer() {
        let a = route(QueueKind::Graphics, 0);
        let b = route(QueueKind::Compute, 1);
        let (src, dst) = barrier_family_indices(a, b, false);
        assert_eq!(src, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(dst, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn real_family_indices_used_with_transfer() {
        let a = route(QueueKind::Graphics, 0);
        let b = route(QueueKind::Compute, 1);
        let (src, dst) = barrier_family_indices(a, b, true);
        assert_eq!((src, dst), (0, 1));
    }
}
