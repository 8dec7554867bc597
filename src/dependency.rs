//! Cross-queue resource synchronization: turns "this command buffer is about to read/write
//! resource X" into the pipeline barriers (same-queue) or binary-semaphore signal/wait pairs
//! (cross-queue) actually required, without the caller needing to track per-resource
//! last-writer/last-reader state itself.
//!
//! Every GPU operation pairs one [`DependencyObject::catch`] + [`DependencyObject::prepare`] with
//! one [`DependencyObject::finish`] or [`DependencyObject::abort`], threaded through one
//! [`Injection`] scratch value. `catch` consumes [`Command::Wait`] entries, matching them against
//! records left `Pending` by an earlier operation's `finish`; `prepare` consumes the `Signal*`
//! variants, claiming a fresh [`SyncRecord`] (sharing a semaphore with a sibling record already
//! claimed by the same injection when possible) and emitting same-queue barriers immediately.
//!
//! Grounded on this crate's own `Queue`/`Semaphore` plumbing (`lib.rs`) for the submission-time
//! semaphore shapes, on the synchronization2 barrier types (`vk::SubmitInfo2`,
//! `vk::ImageMemoryBarrier2`, `vk::DependencyInfo`) the teacher's queue submission path already
//! uses, and on [`crate::queue_router`] for the `(family, queue)` routing and ownership-transfer
//! classification §4.6 describes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::command::CommandBuffer;
use crate::error::{Error, Result};
use crate::queue_router::{self, QueueRoute};
use crate::DeviceShared;

/// Where a [`SyncRecord`] sits in the round trip described in §4.5's rationale:
/// `Unused -> Prepare -> Pending -> Catch -> Used -> Unused`, with `PrepareCatch` as the
/// same-injection fast path when a resource is both signaled and waited on within one operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Unused,
    Prepare,
    PrepareCatch,
    Catch,
    Pending,
    Used,
}

/// The underlying Vulkan object a [`SyncRecord`] tracks. Buffers never carry a subresource range
/// or a layout; images always do.
#[derive(Clone, Copy)]
pub enum TrackedResource {
    Buffer(vk::Buffer),
    Image(vk::Image, vk::ImageSubresourceRange),
}

/// Inter-subsystem handshake with the external renderer's attachment bookkeeping (§9: "model it
/// as a trait the attachment collaborator implements, not as a friend data-member"). An
/// [`InjectionRef`] that names a renderer attachment supplies one of these so [`finish`]/[`abort`]
/// can flip its `signaled` bit and so a stale `generation` can be detected in [`DependencyObject::catch`].
pub trait SyncAttachment {
    /// Monotonic counter bumped whenever the attachment is reallocated (resized, recreated).
    fn generation(&self) -> u64;
    /// Set on `finish` when a `Prepare` record completes (signaled for consumers outside this
    /// renderer) and cleared on `finish` when a `Catch` record completes (caught from outside).
    fn set_signaled(&self, signaled: bool);
    /// Identifies the device this attachment's underlying image was created against, compared in
    /// `prepare`/`catch` against the `DependencyObject`'s own device (`DeviceShared::context_id`).
    /// A mismatch is the "resource from another device" case §7 calls cross-context.
    fn context(&self) -> u64;
    /// The renderer that owns this attachment, if any, compared against `Injection::renderer`.
    fn renderer(&self) -> Option<u64>;
}

struct SyncRecord {
    resource: u64,
    vulkan: TrackedResource,
    stage: Stage,
    needs_barrier: bool,
    memory_hazard: bool,
    has_semaphore: bool,
    generation: Option<u64>,
    owning_injection: Option<u64>,
    semaphore: Option<vk::Semaphore>,
    sem_stages: vk::PipelineStageFlags2,
    src_stage: vk::PipelineStageFlags2,
    dst_stage: vk::PipelineStageFlags2,
    src_access: vk::AccessFlags2,
    dst_access: vk::AccessFlags2,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_queue_family: u32,
    dst_queue_family: u32,
    attachment: Option<Arc<dyn SyncAttachment + Send + Sync>>,
}

/// One resource this operation touches, supplied by the caller before `catch`/`prepare` run.
pub struct InjectionRef {
    pub resource: u64,
    pub vulkan: TrackedResource,
    pub access_mask: vk::AccessFlags2,
    /// `VK_SHARING_MODE_CONCURRENT` (or equivalent engine-level flag): exempts the resource from
    /// ownership transfer, forcing both barrier queue-family fields to `IGNORED`.
    pub concurrent: bool,
    pub attachment: Option<Arc<dyn SyncAttachment + Send + Sync>>,
    transitioned: bool,
}

impl InjectionRef {
    pub fn new(resource: u64, vulkan: TrackedResource, access_mask: vk::AccessFlags2) -> Self {
        Self {
            resource,
            vulkan,
            access_mask,
            concurrent: false,
            attachment: None,
            transitioned: false,
        }
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn attachment(mut self, attachment: Arc<dyn SyncAttachment + Send + Sync>) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// A user-supplied cross-operation hand-off point, consumed by `catch` (`Wait`) or `prepare`
/// (every other variant).
pub enum Command {
    Wait {
        resource: Option<u64>,
    },
    Signal {
        resource: Option<u64>,
        hint: queue_router::AsyncHint,
        dst_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        discard: bool,
    },
    SignalFrom {
        resource: Option<u64>,
        hint: queue_router::AsyncHint,
        src_access: vk::AccessFlags2,
        src_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        discard: bool,
    },
    SignalRange {
        resource: u64,
        range: vk::ImageSubresourceRange,
        hint: queue_router::AsyncHint,
        dst_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        discard: bool,
    },
    SignalRangeFrom {
        resource: u64,
        range: vk::ImageSubresourceRange,
        hint: queue_router::AsyncHint,
        src_access: vk::AccessFlags2,
        src_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        discard: bool,
    },
}

#[derive(Default)]
pub struct InjectionOutput {
    /// Binary semaphores (plus the accumulated pipeline stages to wait at) the caller must
    /// include in its `vkQueueSubmit2` wait list.
    pub waits: Vec<(vk::Semaphore, vk::PipelineStageFlags2)>,
    /// Binary semaphores this injection must signal on submission.
    pub sigs: Vec<vk::Semaphore>,
    pub stages: Vec<vk::PipelineStageFlags2>,
}

/// Per-operation scratch, owned by the caller for the duration of one command submission.
pub struct Injection {
    pub refs: Vec<InjectionRef>,
    pub queue: QueueRoute,
    pub renderer: Option<u64>,
    pub pass: Option<u64>,
    pub commands: Vec<Command>,
    pub out: InjectionOutput,
    id: u64,
}

static NEXT_INJECTION_ID: AtomicU64 = AtomicU64::new(1);

impl Injection {
    pub fn new(queue: QueueRoute) -> Self {
        Self {
            refs: Vec::new(),
            queue,
            renderer: None,
            pass: None,
            commands: Vec::new(),
            out: InjectionOutput::default(),
            id: NEXT_INJECTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn push_ref(&mut self, r: InjectionRef) {
        self.refs.push(r);
    }

    pub fn push_command(&mut self, c: Command) {
        self.commands.push(c);
    }
}

/// Coordinates synchronization across every [`Injection`] caught/prepared against it. All
/// internal state sits behind a single `parking_lot::Mutex`, matching the "coarse-grained locks
/// are acceptable" design §5 allows throughout.
pub struct DependencyObject {
    device: Arc<DeviceShared>,
    inner: Mutex<Inner>,
    graphics: QueueRoute,
    compute: QueueRoute,
    transfer: QueueRoute,
    #[allow(dead_code)]
    wait_capacity: usize,
}

struct Inner {
    /// Front/back-partitioned deque: `[0, sem_count)` carries semaphores, the remainder does not.
    syncs: VecDeque<SyncRecord>,
    sem_count: usize,
}

impl DependencyObject {
    /// Queue routes are derived from the device's own queue-family selection
    /// (`DeviceShared::queue_family_indices`) rather than taken as parameters, so this matches
    /// the crate's external two-argument constructor while still giving §4.6 routing real family
    /// indices to work with.
    pub fn new(device: Arc<DeviceShared>, wait_capacity: usize) -> Result<Self> {
        let (graphics_family, _present_family, compute_family, transfer_family) =
            device.queue_family_indices();
        let graphics = QueueRoute { kind: queue_router::QueueKind::Graphics, family: graphics_family, queue: 0 };
        let compute = QueueRoute { kind: queue_router::QueueKind::Compute, family: compute_family, queue: 0 };
        let transfer = QueueRoute { kind: queue_router::QueueKind::Transfer, family: transfer_family, queue: 0 };

        Ok(Self {
            device,
            inner: Mutex::new(Inner {
                syncs: VecDeque::with_capacity(wait_capacity),
                sem_count: 0,
            }),
            graphics,
            compute,
            transfer,
            wait_capacity,
        })
    }

    // No free-list: a semaphore destroyed by shrink_deque() is gone for good, so every claim that
    // can't share a sibling's semaphore creates a fresh one. The front-partition invariant already
    // bounds how many are ever live at once to `sem_count`.
    fn acquire_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.raw.create_semaphore(&info, None)? })
    }

    /// §4.5.1 `catch`: consumes every [`Command::Wait`] in `injection.commands`.
    pub fn catch(&self, cmd: &CommandBuffer, injection: &mut Injection) -> Result<()> {
        let mut inner = self.inner.lock();

        // Opportunistic GC: Used records whose round trip is fully done degrade to Unused so a
        // later finalize's deque-shrink can drop them.
        for record in inner.syncs.iter_mut() {
            if record.stage == Stage::Used {
                record.stage = Stage::Unused;
            }
        }

        for i in 0..injection.commands.len() {
            let Command::Wait { resource } = &injection.commands[i] else {
                continue;
            };
            let resource = *resource;

            let candidates: Vec<usize> = (0..inner.syncs.len())
                .filter(|&idx| {
                    let r = &inner.syncs[idx];
                    let dest_matches = r.dst_queue_family == injection.queue.family;
                    let stage_matches = matches!(r.stage, Stage::Pending)
                        || (matches!(r.stage, Stage::Prepare) && r.owning_injection == Some(injection.id));
                    let resource_matches = resource.map_or(true, |res| res == r.resource);
                    dest_matches && stage_matches && resource_matches
                })
                .collect();

            for idx in candidates {
                self.process_wait_match(cmd, &mut inner, idx, injection)?;
            }
        }

        // After every Wait has been processed, any input reference that was never transitioned
        // by a matched record (and is not a buffer) still needs an initial UNDEFINED -> layout
        // transition before first use.
        for r in injection.refs.iter_mut() {
            if r.transitioned {
                continue;
            }
            if let TrackedResource::Image(image, range) = r.vulkan {
                let new_layout = layout_for_access(r.access_mask);
                let barrier = vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                    .src_access_mask(vk::AccessFlags2::empty())
                    .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                    .dst_access_mask(r.access_mask)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(range);
                let dep_info = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
                unsafe { self.device.raw.cmd_pipeline_barrier2(cmd.raw, &dep_info) };
                r.transitioned = true;
            }
        }

        Ok(())
    }

    fn process_wait_match(
        &self,
        cmd: &CommandBuffer,
        inner: &mut Inner,
        idx: usize,
        injection: &mut Injection,
    ) -> Result<()> {
        // Stale-generation check: resolved per §9's Open Question #2 — a stale match reverts
        // stage rather than consuming a semaphore, i.e. is treated as though never matched.
        if let (Some(attachment), Some(generation)) =
            (&inner.syncs[idx].attachment, inner.syncs[idx].generation)
        {
            if attachment.generation() != generation {
                log::warn!(
                    "dependency: stale attachment generation for resource {}, skipping barrier",
                    inner.syncs[idx].resource
                );
                return Ok(());
            }
        }

        let was_prepare = inner.syncs[idx].stage == Stage::Prepare;
        inner.syncs[idx].stage = if was_prepare { Stage::PrepareCatch } else { Stage::Catch };

        let resource = inner.syncs[idx].resource;
        if let Some(r) = injection.refs.iter_mut().find(|r| r.resource == resource) {
            r.transitioned = true;
        }

        if inner.syncs[idx].needs_barrier {
            self.emit_barrier(cmd, &inner.syncs[idx]);
        }
        if inner.syncs[idx].has_semaphore {
            if let Some(semaphore) = inner.syncs[idx].semaphore {
                injection.out.waits.push((semaphore, inner.syncs[idx].sem_stages));
            }
        }

        Ok(())
    }

    fn emit_barrier(&self, cmd: &CommandBuffer, record: &SyncRecord) {
        match record.vulkan {
            TrackedResource::Buffer(buffer) => {
                let barrier = if record.memory_hazard {
                    vk::BufferMemoryBarrier2::default()
                        .src_stage_mask(record.src_stage)
                        .src_access_mask(record.src_access)
                        .dst_stage_mask(record.dst_stage)
                        .dst_access_mask(record.dst_access)
                        .src_queue_family_index(record.src_queue_family)
                        .dst_queue_family_index(record.dst_queue_family)
                        .buffer(buffer)
                        .offset(0)
                        .size(vk::WHOLE_SIZE)
                } else {
                    vk::BufferMemoryBarrier2::default()
                        .src_stage_mask(record.src_stage)
                        .dst_stage_mask(record.dst_stage)
                        .buffer(buffer)
                        .offset(0)
                        .size(vk::WHOLE_SIZE)
                };
                let dep_info = vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(&barrier));
                unsafe { self.device.raw.cmd_pipeline_barrier2(cmd.raw, &dep_info) };
            }
            TrackedResource::Image(image, range) => {
                let barrier = vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(record.src_stage)
                    .src_access_mask(if record.memory_hazard { record.src_access } else { vk::AccessFlags2::empty() })
                    .dst_stage_mask(record.dst_stage)
                    .dst_access_mask(if record.memory_hazard { record.dst_access } else { vk::AccessFlags2::empty() })
                    .old_layout(record.old_layout)
                    .new_layout(record.new_layout)
                    .src_queue_family_index(record.src_queue_family)
                    .dst_queue_family_index(record.dst_queue_family)
                    .image(image)
                    .subresource_range(range);
                let dep_info = vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
                unsafe { self.device.raw.cmd_pipeline_barrier2(cmd.raw, &dep_info) };
            }
        }
    }

    /// §4.5.2 `prepare`: consumes every `Signal*` command in `injection.commands`.
    pub fn prepare(&self, cmd: &CommandBuffer, blocking: bool, injection: &mut Injection) -> Result<()> {
        let commands = std::mem::take(&mut injection.commands);
        for command in &commands {
            self.process_signal(cmd, blocking, injection, command)?;
        }
        injection.commands = commands;
        Ok(())
    }

    fn process_signal(
        &self,
        cmd: &CommandBuffer,
        blocking: bool,
        injection: &mut Injection,
        command: &Command,
    ) -> Result<()> {
        let (resource_filter, hint, src_over, dst_access, dst_stage, discard, range_over) = match command {
            Command::Signal { resource, hint, dst_access, dst_stage, discard } => {
                (*resource, *hint, None, *dst_access, *dst_stage, *discard, None)
            }
            Command::SignalFrom { resource, hint, src_access, src_stage, dst_access, dst_stage, discard } => {
                (*resource, *hint, Some((*src_access, *src_stage)), *dst_access, *dst_stage, *discard, None)
            }
            Command::SignalRange { resource, range, hint, dst_access, dst_stage, discard } => {
                (Some(*resource), *hint, None, *dst_access, *dst_stage, *discard, Some(*range))
            }
            Command::SignalRangeFrom { resource, range, hint, src_access, src_stage, dst_access, dst_stage, discard } => {
                (Some(*resource), *hint, Some((*src_access, *src_stage)), *dst_access, *dst_stage, *discard, Some(*range))
            }
            Command::Wait { .. } => return Ok(()),
        };

        let targets: Vec<usize> = match resource_filter {
            Some(resource) => {
                match injection.refs.iter().position(|r| r.resource == resource) {
                    Some(i) => vec![i],
                    None => {
                        log::warn!("dependency: signal command named resource {resource} not among this operation's input references");
                        return Ok(());
                    }
                }
            }
            None => (0..injection.refs.len()).collect(),
        };

        let dst = queue_router::route(hint, self.graphics, self.compute, self.transfer);

        for ref_idx in targets {
            if !self.ref_passes_context_check(injection, ref_idx) {
                continue;
            }
            self.claim_and_init(cmd, blocking, injection, ref_idx, dst, src_over, dst_access, dst_stage, discard, range_over)?;
        }
        Ok(())
    }

    /// §4.5.2 step 1: a referenced attachment must belong to this device, and if it names an
    /// owning renderer that renderer must match `injection.renderer`. Neither case is fatal;
    /// both are logged and the reference is left unclaimed, matching §7's handling of
    /// `Error::CrossContextReference`.
    fn ref_passes_context_check(&self, injection: &Injection, ref_idx: usize) -> bool {
        let r = &injection.refs[ref_idx];
        let Some(attachment) = r.attachment.as_ref() else {
            return true;
        };
        if attachment.context() != self.device.context_id() {
            log::warn!("dependency: {} (resource {})", Error::CrossContextReference, r.resource);
            return false;
        }
        if let Some(owner) = attachment.renderer() {
            if injection.renderer != Some(owner) {
                log::warn!("dependency: {} (resource {})", Error::CrossContextReference, r.resource);
                return false;
            }
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn claim_and_init(
        &self,
        cmd: &CommandBuffer,
        blocking: bool,
        injection: &mut Injection,
        ref_idx: usize,
        dst: QueueRoute,
        src_over: Option<(vk::AccessFlags2, vk::PipelineStageFlags2)>,
        dst_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        discard: bool,
        range_over: Option<vk::ImageSubresourceRange>,
    ) -> Result<()> {
        let r = &injection.refs[ref_idx];
        let resource = r.resource;
        let vulkan = match (r.vulkan, range_over) {
            (TrackedResource::Image(image, _), Some(range)) => TrackedResource::Image(image, range),
            (other, _) => other,
        };
        let concurrent = r.concurrent;
        let attachment = r.attachment.clone();
        let src_access = src_over.map(|(a, _)| a).unwrap_or(r.access_mask);
        let src_stage = src_over.map(|(_, s)| s).unwrap_or(vk::PipelineStageFlags2::ALL_COMMANDS);

        let need_semaphore = dst != injection.queue && !blocking;

        let mut inner = self.inner.lock();

        let shared_idx = if need_semaphore {
            (0..inner.sem_count).find(|&i| {
                inner.syncs[i].owning_injection == Some(injection.id)
                    && inner.syncs[i].dst_queue_family == dst.family
            })
        } else {
            None
        };

        let semaphore = if need_semaphore {
            match shared_idx {
                Some(i) => {
                    inner.syncs[i].sem_stages |= dst_stage;
                    let sem = inner.syncs[i].semaphore;
                    sem
                }
                None => {
                    let sem = self.acquire_semaphore()?;
                    injection.out.sigs.push(sem);
                    injection.out.stages.push(dst_stage);
                    Some(sem)
                }
            }
        } else {
            None
        };

        let mut old_layout = match vulkan {
            TrackedResource::Image(_, _) => layout_for_access(src_access),
            TrackedResource::Buffer(_) => vk::ImageLayout::UNDEFINED,
        };
        let new_layout = match vulkan {
            TrackedResource::Image(_, _) => layout_for_access(dst_access),
            TrackedResource::Buffer(_) => vk::ImageLayout::UNDEFINED,
        };
        let layout_transition = old_layout != new_layout;
        if discard && layout_transition {
            old_layout = vk::ImageLayout::UNDEFINED;
        }

        let ownership_transfer =
            queue_router::needs_ownership_transfer(injection.queue, dst, concurrent, discard);
        let (src_family, dst_family) =
            queue_router::barrier_family_indices(injection.queue, dst, ownership_transfer);
        let same_queue = injection.queue.family == dst.family;
        let source_writes = is_write_access(src_access);

        let needs_barrier_at_catch = (same_queue && (source_writes || is_write_access(dst_access)))
            || (!same_queue && !discard && !concurrent)
            || layout_transition;
        let memory_hazard_at_catch = (same_queue && source_writes) || ownership_transfer || layout_transition;
        let release_at_prepare = ownership_transfer && !discard;
        let host_flush = queue_router::needs_host_flush(dst_access, source_writes);
        let needs_barrier_at_prepare = release_at_prepare || host_flush;

        let flags_has_semaphore = semaphore.is_some();

        let record = SyncRecord {
            resource,
            vulkan,
            stage: Stage::Prepare,
            needs_barrier: needs_barrier_at_catch,
            memory_hazard: memory_hazard_at_catch,
            has_semaphore: flags_has_semaphore,
            generation: attachment.as_ref().map(|a| a.generation()),
            owning_injection: Some(injection.id),
            semaphore,
            sem_stages: dst_stage,
            src_stage,
            dst_stage: if needs_barrier_at_prepare { vk::PipelineStageFlags2::NONE } else { dst_stage },
            src_access,
            dst_access: if needs_barrier_at_prepare { vk::AccessFlags2::empty() } else { dst_access },
            old_layout,
            new_layout,
            src_queue_family: src_family,
            dst_queue_family: dst_family,
            attachment,
        };

        let emit_prepare_barrier = needs_barrier_at_prepare;
        let index = self.push_record(&mut inner, record);

        if emit_prepare_barrier {
            self.emit_barrier(cmd, &inner.syncs[index]);
        }

        Ok(())
    }

    /// Inserts `record` maintaining the front/back semaphore partition invariant (§3, §8).
    fn push_record(&self, inner: &mut Inner, record: SyncRecord) -> usize {
        if record.has_semaphore {
            inner.syncs.insert(inner.sem_count, record);
            inner.sem_count += 1;
            inner.sem_count - 1
        } else {
            inner.syncs.push_back(record);
            inner.syncs.len() - 1
        }
    }

    /// §4.5.3 `finish`/`abort` (`finalize`). `success = true` is `finish`, `false` is `abort`.
    fn finalize(&self, injection: &mut Injection, success: bool) {
        injection.out.waits.clear();
        injection.out.sigs.clear();
        injection.out.stages.clear();

        let mut inner = self.inner.lock();
        for idx in 0..inner.syncs.len() {
            if inner.syncs[idx].owning_injection != Some(injection.id) {
                continue;
            }

            if let Some(attachment) = inner.syncs[idx].attachment.clone() {
                match (success, inner.syncs[idx].stage) {
                    (true, Stage::Prepare | Stage::PrepareCatch) => attachment.set_signaled(true),
                    (true, Stage::Catch) => attachment.set_signaled(false),
                    _ => {}
                }
            }

            inner.syncs[idx].stage = match (success, inner.syncs[idx].stage) {
                (true, Stage::Prepare) => Stage::Pending,
                (true, Stage::Catch) | (true, Stage::PrepareCatch) => {
                    if inner.syncs[idx].has_semaphore {
                        Stage::Used
                    } else {
                        Stage::Unused
                    }
                }
                (false, Stage::Catch) | (false, Stage::PrepareCatch) => Stage::Pending,
                (false, Stage::Prepare) => Stage::Unused,
                (_, other) => other,
            };
            inner.syncs[idx].owning_injection = None;
        }

        self.shrink_deque(&mut inner);
    }

    pub fn finish(&self, injection: &mut Injection) {
        self.finalize(injection, true);
    }

    pub fn abort(&self, injection: &mut Injection) {
        self.finalize(injection, false);
    }

    /// Removes all `Unused` non-semaphore records from the back, then all `Unused`
    /// semaphore-bearing records from the front (destroying their semaphores), maintaining the
    /// front/back partition invariant.
    fn shrink_deque(&self, inner: &mut Inner) {
        while let Some(back) = inner.syncs.back() {
            if inner.syncs.len() <= inner.sem_count {
                break;
            }
            if back.stage != Stage::Unused {
                break;
            }
            inner.syncs.pop_back();
        }

        while inner.sem_count > 0 {
            let front_unused = matches!(inner.syncs.front(), Some(r) if r.stage == Stage::Unused);
            if !front_unused {
                break;
            }
            if let Some(record) = inner.syncs.pop_front() {
                if let Some(semaphore) = record.semaphore {
                    unsafe { self.device.raw.destroy_semaphore(semaphore, None) };
                }
            }
            inner.sem_count -= 1;
        }
    }
}

impl Drop for DependencyObject {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        for record in inner.syncs.drain(..) {
            if let Some(semaphore) = record.semaphore {
                unsafe { self.device.raw.destroy_semaphore(semaphore, None) };
            }
        }
    }
}

fn is_write_access(access: vk::AccessFlags2) -> bool {
    let write_bits = vk::AccessFlags2::SHADER_WRITE
        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
        | vk::AccessFlags2::TRANSFER_WRITE
        | vk::AccessFlags2::HOST_WRITE
        | vk::AccessFlags2::MEMORY_WRITE;
    access.intersects(write_bits)
}

/// Minimal access-mask -> layout derivation used when a command does not pin down an explicit
/// layout. A real engine would route this through its own format/usage-aware table; this covers
/// the common read/write/transfer/present cases §4.5.2 and §8's scenario 6 exercise.
fn layout_for_access(access: vk::AccessFlags2) -> vk::ImageLayout {
    if access.contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE) {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else if access.intersects(
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
    ) {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    } else if access.contains(vk::AccessFlags2::TRANSFER_WRITE) {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL
    } else if access.contains(vk::AccessFlags2::TRANSFER_READ) {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL
    } else if access.contains(vk::AccessFlags2::SHADER_READ) {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    } else if access.contains(vk::AccessFlags2::SHADER_WRITE) {
        vk::ImageLayout::GENERAL
    } else {
        vk::ImageLayout::GENERAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_router::QueueKind;

    fn route(kind: QueueKind, family: u32) -> QueueRoute {
        QueueRoute { kind, family, queue: 0 }
    }

    #[test]
    fn deque_partition_invariant_holds_after_manual_construction() {
        let mut syncs: VecDeque<SyncRecord> = VecDeque::new();
        syncs.push_back(SyncRecord {
            resource: 1,
            vulkan: TrackedResource::Buffer(vk::Buffer::null()),
            stage: Stage::Pending,
            needs_barrier: false,
            memory_hazard: false,
            has_semaphore: true,
            generation: None,
            owning_injection: None,
            semaphore: None,
            sem_stages: vk::PipelineStageFlags2::empty(),
            src_stage: vk::PipelineStageFlags2::empty(),
            dst_stage: vk::PipelineStageFlags2::empty(),
            src_access: vk::AccessFlags2::empty(),
            dst_access: vk::AccessFlags2::empty(),
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::UNDEFINED,
            src_queue_family: 0,
            dst_queue_family: 0,
            attachment: None,
        });
        let sem_count = 1;
        assert!(syncs[0].has_semaphore);
        assert_eq!(sem_count, 1);
    }

    #[test]
    fn write_access_detection_covers_common_write_bits() {
        assert!(is_write_access(vk::AccessFlags2::SHADER_WRITE));
        assert!(is_write_access(vk::AccessFlags2::TRANSFER_WRITE));
        assert!(!is_write_access(vk::AccessFlags2::SHADER_READ));
    }

    #[test]
    fn layout_for_color_attachment_write() {
        assert_eq!(
            layout_for_access(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn ownership_transfer_required_cross_queue_non_discard() {
        let graphics = route(QueueKind::Graphics, 0);
        let compute = route(QueueKind::Compute, 1);
        assert!(queue_router::needs_ownership_transfer(compute, graphics, false, false));
    }
}
