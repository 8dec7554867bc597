//! Deduplicating, single-creator cache for GPU objects whose identity is entirely determined by
//! their create-info contents: descriptor-set layouts, pipeline layouts, samplers, render passes,
//! and graphics/compute pipelines.
//!
//! Two callers racing to create "the same" object (same structural key) are guaranteed to observe
//! exactly one underlying `vkCreate*` call between them; the loser blocks on `create_lock` rather
//! than creating a duplicate and throwing one away. This mirrors the retry-under-lock shape
//! `phobos-rs`'s `DescriptorCacheInner::get_descriptor_set` uses for descriptor sets, generalized
//! here to six different Vulkan object kinds behind a two-tier immutable/mutable map.
//!
//! The two tiers exist so that, after the first few frames, the overwhelming majority of lookups
//! land in `immutable` and only ever take a `parking_lot::RwLock` read guard (cheap,
//! multiple-readers-at-once) rather than contending on a single writer lock. New objects first
//! land in `mutable`; [`ObjectCache::flush`] periodically promotes them into `immutable`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::key::HashKey;
use crate::structural_key::CreateInfo;
use crate::DeviceShared;

/// Discriminated union over every GPU object kind the cache manages. Destruction in
/// [`ObjectCache::clear`] matches on this to call the right `vkDestroy*`.
pub enum CacheElement {
    DescriptorSetLayout(vk::DescriptorSetLayout),
    PipelineLayout(vk::PipelineLayout),
    Sampler(vk::Sampler),
    RenderPass(vk::RenderPass),
    GraphicsPipeline(vk::Pipeline),
    ComputePipeline(vk::Pipeline),
}

impl CacheElement {
    /// Raw handle as a `u64`, suitable for passing back to [`crate::structural_key`] as a handle
    /// substitution when this element is itself referenced by another create-info (a pipeline
    /// referencing a set layout, for example).
    pub fn raw_handle(&self) -> u64 {
        use ash::vk::Handle;
        match self {
            CacheElement::DescriptorSetLayout(h) => h.as_raw(),
            CacheElement::PipelineLayout(h) => h.as_raw(),
            CacheElement::Sampler(h) => h.as_raw(),
            CacheElement::RenderPass(h) => h.as_raw(),
            CacheElement::GraphicsPipeline(h) => h.as_raw(),
            CacheElement::ComputePipeline(h) => h.as_raw(),
        }
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        match self {
            CacheElement::DescriptorSetLayout(h) => {
                device.destroy_descriptor_set_layout(*h, None)
            }
            CacheElement::PipelineLayout(h) => device.destroy_pipeline_layout(*h, None),
            CacheElement::Sampler(h) => device.destroy_sampler(*h, None),
            CacheElement::RenderPass(h) => device.destroy_render_pass(*h, None),
            CacheElement::GraphicsPipeline(h) | CacheElement::ComputePipeline(h) => {
                device.destroy_pipeline(*h, None)
            }
        }
    }
}

/// An entry in the immutable table. `Pending` is the "vacant placeholder" §4.3.1 describes:
/// reserved by a [`ObjectCache::warmup`] call that is still constructing the underlying object
/// without holding any lock, so a second `warmup` racing on the same key observes the
/// reservation and returns immediately rather than constructing a duplicate.
enum ImmutableSlot {
    Pending,
    Ready(Arc<CacheElement>),
}

/// Tracks whether `warmup`/`get` are currently executing, purely to back the debug assertion in
/// §8 ("Cache warmup/get disjointness"): the two must never run concurrently against the same
/// cache. Production builds pay only an `AtomicUsize` increment/decrement for this.
#[derive(Default)]
struct ReentrancyGuardCounters {
    warmups: AtomicUsize,
    gets: AtomicUsize,
}

struct ReentrancyGuard<'a> {
    counters: &'a ReentrancyGuardCounters,
    is_warmup: bool,
}

impl<'a> ReentrancyGuard<'a> {
    fn enter(counters: &'a ReentrancyGuardCounters, is_warmup: bool) -> Self {
        if is_warmup {
            counters.warmups.fetch_add(1, Ordering::SeqCst);
            debug_assert_eq!(
                counters.gets.load(Ordering::SeqCst),
                0,
                "warmup() called while get() is in flight on the same ObjectCache"
            );
        } else {
            counters.gets.fetch_add(1, Ordering::SeqCst);
            debug_assert_eq!(
                counters.warmups.load(Ordering::SeqCst),
                0,
                "get() called while warmup() is in flight on the same ObjectCache"
            );
        }
        Self { counters, is_warmup }
    }
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        if self.is_warmup {
            self.counters.warmups.fetch_sub(1, Ordering::SeqCst);
        } else {
            self.counters.gets.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Deduplicating cache for [`CacheElement`]s, keyed by their structural [`HashKey`].
///
/// `immutable` (`lookupLock` in §4.3) is the read-mostly tier: written only by [`Self::warmup`]'s
/// placeholder dance and by [`Self::flush`]'s merge, read lockless-in-spirit (a
/// `parking_lot::RwLock` read guard) by every [`Self::get`]/[`Self::warmup`] call. `mutable`
/// absorbs everything [`Self::get`] creates on a miss; `create_lock` (`createLock` in §4.3)
/// serializes creators so a cache-miss race produces exactly one underlying GPU object.
pub struct ObjectCache {
    device: Arc<DeviceShared>,
    immutable: RwLock<HashMap<HashKey, ImmutableSlot>>,
    mutable: RwLock<HashMap<HashKey, Arc<CacheElement>>>,
    create_lock: Mutex<()>,
    pipeline_cache: vk::PipelineCache,
    reentrancy: ReentrancyGuardCounters,
}

impl ObjectCache {
    /// Creates a new cache, optionally seeding the underlying `VkPipelineCache` from
    /// previously-[`serialize`](Self::serialize)d bytes. Passing `None` starts with an empty
    /// pipeline cache, same as a fresh install.
    pub fn new(device: Arc<DeviceShared>, initial_data: Option<&[u8]>) -> Result<Self> {
        let mut create_info = vk::PipelineCacheCreateInfo::default();
        if let Some(data) = initial_data {
            create_info = create_info.initial_data(data);
        }
        let pipeline_cache = unsafe { device.raw.create_pipeline_cache(&create_info, None)? };

        Ok(Self {
            device,
            immutable: RwLock::new(HashMap::new()),
            mutable: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
            pipeline_cache,
            reentrancy: ReentrancyGuardCounters::default(),
        })
    }

    /// §4.3.2 `get`: returns the cached element for `create_info`/`handles`, creating it first if
    /// this exact structural key has never been requested before. Must not be called concurrently
    /// with [`Self::warmup`] on the same cache (debug-asserted, see §8).
    pub fn get(&self, create_info: &CreateInfo, handles: &[u64]) -> Result<Arc<CacheElement>> {
        let _guard = ReentrancyGuard::enter(&self.reentrancy, false);
        let key = create_info.build_key(handles)?;

        // Step 2: lockless-in-spirit search of immutable.
        if let Some(ImmutableSlot::Ready(element)) = self.immutable.read().get(&key) {
            return Ok(element.clone());
        }

        // Step 3: search mutable under lookupLock.
        if let Some(element) = self.mutable.read().get(&key) {
            return Ok(element.clone());
        }

        // Step 4: acquire createLock, double-check mutable.
        let _serialize_creation = self.create_lock.lock();
        if let Some(element) = self.mutable.read().get(&key) {
            return Ok(element.clone());
        }

        // Step 5: construct while holding createLock but not lookupLock.
        let element = Arc::new(self.create_vulkan_object(create_info)?);

        // Step 6: publish into mutable under lookupLock.
        self.mutable.write().insert(key, element.clone());
        Ok(element)
    }

    /// §4.3.1 `warmup`: ensures `create_info`/`handles` is present in the cache without returning
    /// it, intended to run up front (for example while loading a level) so a later [`Self::get`]
    /// on a hot path never pays creation cost. Reentrant with itself; must not be called
    /// concurrently with [`Self::get`] on the same cache (debug-asserted, see §8).
    pub fn warmup(&self, create_info: &CreateInfo, handles: &[u64]) -> Result<()> {
        let _guard = ReentrancyGuard::enter(&self.reentrancy, true);
        let key = create_info.build_key(handles)?;

        // Step 2: already present (ready or under construction by another warmup) -> done.
        if self.immutable.read().contains_key(&key) {
            return Ok(());
        }

        // Step 3: insert a vacant placeholder under lookupLock, then release it before
        // constructing so concurrent warmups/readers are not blocked on construction time.
        {
            let mut immutable = self.immutable.write();
            if immutable.contains_key(&key) {
                return Ok(());
            }
            immutable.insert(key.clone(), ImmutableSlot::Pending);
        }

        match self.create_vulkan_object(create_info) {
            Ok(element) => {
                self.immutable
                    .write()
                    .insert(key, ImmutableSlot::Ready(Arc::new(element)));
                Ok(())
            }
            Err(err) => {
                // Step 4: construction failed, erase the placeholder.
                self.immutable.write().remove(&key);
                Err(err)
            }
        }
    }

    fn create_vulkan_object(&self, create_info: &CreateInfo) -> Result<CacheElement> {
        let raw = &self.device.raw;
        unsafe {
            Ok(match create_info {
                CreateInfo::DescriptorSetLayout(info) => {
                    CacheElement::DescriptorSetLayout(raw.create_descriptor_set_layout(info, None)?)
                }
                CreateInfo::PipelineLayout(info) => {
                    CacheElement::PipelineLayout(raw.create_pipeline_layout(info, None)?)
                }
                CreateInfo::Sampler(info) => CacheElement::Sampler(raw.create_sampler(info, None)?),
                CreateInfo::RenderPass(info) => {
                    CacheElement::RenderPass(raw.create_render_pass(info, None)?)
                }
                CreateInfo::RenderPass2(info) => {
                    CacheElement::RenderPass(raw.create_render_pass2(info, None)?)
                }
                CreateInfo::GraphicsPipeline(info) => {
                    let pipeline = raw
                        .create_graphics_pipelines(
                            self.pipeline_cache,
                            std::slice::from_ref(*info),
                            None,
                        )
                        .map_err(|(_, e)| e)?[0];
                    CacheElement::GraphicsPipeline(pipeline)
                }
                CreateInfo::ComputePipeline(info) => {
                    let pipeline = raw
                        .create_compute_pipelines(
                            self.pipeline_cache,
                            std::slice::from_ref(*info),
                            None,
                        )
                        .map_err(|(_, e)| e)?[0];
                    CacheElement::ComputePipeline(pipeline)
                }
            })
        }
    }

    /// Returns the raw bytes of the underlying `VkPipelineCache`, for the caller to persist to
    /// disk and pass back into the next [`ObjectCache::new`] call. Pass-through to
    /// `vkGetPipelineCacheData`; this crate has no opinion on where those bytes are stored.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(unsafe {
            self.device
                .raw
                .get_pipeline_cache_data(self.pipeline_cache)?
        })
    }

    /// §4.3.3 `flush`: merges `mutable` into `immutable`. Duplicates are impossible because
    /// [`Self::get`] only ever inserts keys absent from both tables. Not concurrency-safe with
    /// anything else touching this cache — callers must quiesce `get`/`warmup` first (for
    /// example by calling this only at a frame boundary all worker threads have rejoined at).
    pub fn flush(&self) -> Result<()> {
        let mut mutable = self.mutable.write();
        let mut immutable = self.immutable.write();
        let count = mutable.len();
        for (key, element) in mutable.drain() {
            let previous = immutable.insert(key, ImmutableSlot::Ready(element));
            debug_assert!(
                !matches!(previous, Some(ImmutableSlot::Ready(_))),
                "object cache flush found the same key in both tables"
            );
        }
        log::debug!(
            "object cache flush: promoted {} entries, {} now immutable",
            count,
            immutable.len()
        );
        Ok(())
    }

    /// §4.3.4 `clear`: destroys every GPU object in both tables and empties them. Callers must
    /// guarantee nothing is still using a handle previously returned by `get()`/`warmup()` - this
    /// mirrors the destruction-order contract the rest of this crate's resource wrappers already
    /// rely on (`Device` tears down dependents before itself).
    pub fn clear(&self) {
        let mut immutable = self.immutable.write();
        for (_, slot) in immutable.drain() {
            if let ImmutableSlot::Ready(element) = slot {
                unsafe { element.destroy(&self.device.raw) };
            }
        }
        let mut mutable = self.mutable.write();
        for (_, element) in mutable.drain() {
            unsafe { element.destroy(&self.device.raw) };
        }
    }
}

impl Drop for ObjectCache {
    fn drop(&mut self) {
        self.clear();
        unsafe {
            self.device
                .raw
                .destroy_pipeline_cache(self.pipeline_cache, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrancy_counters_detect_concurrent_get_and_warmup() {
        let counters = ReentrancyGuardCounters::default();
        let warmup_guard = ReentrancyGuard::enter(&counters, true);
        assert_eq!(counters.warmups.load(Ordering::SeqCst), 1);
        assert_eq!(counters.gets.load(Ordering::SeqCst), 0);
        drop(warmup_guard);
        assert_eq!(counters.warmups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn immutable_slot_ready_is_distinguishable_from_pending() {
        let map: HashMap<HashKey, ImmutableSlot> = HashMap::new();
        assert!(map.is_empty());
        // Exercises only the enum shape, not live Vulkan calls - no device is available here.
        let pending = ImmutableSlot::Pending;
        assert!(matches!(pending, ImmutableSlot::Pending));
    }
}
