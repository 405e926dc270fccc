//! Tracking of image layouts and queue family ownership.
//!
//! The state of every image and buffer subresource is kept in a [`TrackedState`], which maps the
//! flattened subresource indices of the resource (see [`Image::iter_ranges`]) to a
//! [`SubresourceState`]. This global state only changes when command buffers are submitted.
//!
//! While a command buffer is being recorded, its effect on the resources it touches is kept in a
//! [`RecordingState`]. For every image subresource that the command buffer uses, it knows the
//! layout that the subresource is in at that point of the command buffer, and, if the first use
//! of the subresource depends on a layout that was established before the command buffer
//! started, which layout that is. Accesses and queue family ownership transfers are appended to
//! a log in recording order.
//!
//! At submission, the log is replayed against the global state. The replay produces a
//! [`ReplayReport`], which lists the inconsistencies that were found and holds the state that the
//! resources will be in once the command buffer has executed. The report is computed once per
//! submitted command buffer and is shared by every rule that inspects it.

use crate::{
    buffer::Buffer,
    command_buffer::CommandBuffer,
    device::Queue,
    image::{Image, ImageLayout, ImageSubresourceRange},
    render_pass::RenderPassInstance,
    resource::Resources,
    rules::{Operation, RuleContext, RuleResult, Violation, Violations},
    sync::{PipelineStages, Sharing, QUEUE_FAMILY_EXTERNAL, QUEUE_FAMILY_FOREIGN},
    DeviceSize, Id, Object,
};
use foldhash::{HashMap, HashSet};
use log::trace;
use parking_lot::Mutex;
use rangemap::RangeMap;
use smallvec::SmallVec;
use std::{
    fmt,
    ops::Range,
    sync::{Arc, OnceLock},
};

/// Which queue family owns a subresource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueFamilyOwnership {
    /// No queue family has used the subresource yet, or the resource has concurrent sharing.
    Ignored,

    /// The subresource is owned by the given queue family.
    Owned(u32),

    /// The subresource was released by `src` and awaits an acquire by `dst`.
    Released { src: u32, dst: u32 },
}

/// The tracked state of a single subresource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubresourceState {
    pub layout: ImageLayout,
    pub owner: QueueFamilyOwnership,

    /// The stages that last wrote to the subresource.
    pub last_write: PipelineStages,

    /// The stages that read from the subresource since the last write.
    pub last_read: PipelineStages,
}

impl SubresourceState {
    pub(crate) fn new(layout: ImageLayout) -> Self {
        SubresourceState {
            layout,
            ..Default::default()
        }
    }
}

impl Default for SubresourceState {
    #[inline]
    fn default() -> Self {
        SubresourceState {
            layout: ImageLayout::Undefined,
            owner: QueueFamilyOwnership::Ignored,
            last_write: PipelineStages::empty(),
            last_read: PipelineStages::empty(),
        }
    }
}

/// The state of all subresources of an image or buffer.
#[derive(Debug)]
pub struct TrackedState {
    ranges: Mutex<RangeMap<DeviceSize, SubresourceState>>,
}

impl TrackedState {
    pub(crate) fn new(size: DeviceSize, initial: SubresourceState) -> Self {
        let mut ranges = RangeMap::new();

        if size != 0 {
            ranges.insert(0..size, initial);
        }

        TrackedState {
            ranges: Mutex::new(ranges),
        }
    }

    /// Returns the state of the subresource with the given flattened index.
    #[inline]
    pub fn get(&self, index: DeviceSize) -> Option<SubresourceState> {
        self.ranges.lock().get(&index).copied()
    }

    /// Returns the state of all subresources, with adjacent subresources that are in the same
    /// state coalesced.
    pub fn states(&self) -> Vec<(Range<DeviceSize>, SubresourceState)> {
        self.ranges
            .lock()
            .iter()
            .map(|(range, state)| (range.clone(), *state))
            .collect()
    }

    fn snapshot(&self) -> RangeMap<DeviceSize, SubresourceState> {
        self.ranges.lock().clone()
    }

    fn replace(&self, ranges: RangeMap<DeviceSize, SubresourceState>) {
        *self.ranges.lock() = ranges;
    }
}

/// Applies `f` to each part of `range`. `f` receives the current value of the part, or `None`
/// for parts of `range` that are not in the map, and returns the new value, or `None` to leave
/// the part as it is.
fn update_ranges<V: Clone + Eq>(
    map: &mut RangeMap<DeviceSize, V>,
    range: Range<DeviceSize>,
    mut f: impl FnMut(Option<&V>) -> Option<V>,
) {
    if range.is_empty() {
        return;
    }

    let mut updates: SmallVec<[(Range<DeviceSize>, V); 4]> = SmallVec::new();

    for (part, value) in map.overlapping(&range) {
        let part = part.start.max(range.start)..part.end.min(range.end);

        if let Some(value) = f(Some(value)) {
            updates.push((part, value));
        }
    }

    for gap in map.gaps(&range) {
        if let Some(value) = f(None) {
            updates.push((gap, value));
        }
    }

    for (part, value) in updates {
        map.insert(part, value);
    }
}

/// A resource whose subresources are tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum TrackedResource {
    Image(Id<Image>),
    Buffer(Id<Buffer>),
}

impl TrackedResource {
    fn erase(self) -> Id {
        match self {
            TrackedResource::Image(id) => id.erase(),
            TrackedResource::Buffer(id) => id.erase(),
        }
    }
}

/// The layout of an image subresource within a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalLayout {
    /// The layout that the subresource must be in when the command buffer starts executing, if
    /// the command buffer depends on it.
    pub expected: Option<ImageLayout>,

    /// The layout of the subresource after the commands recorded so far.
    pub current: ImageLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AccessKind {
    /// The resource is read or written by a command.
    Use,

    /// A barrier is applied to the resource, without an ownership transfer.
    Barrier,

    /// Ownership is released from `src` to `dst`.
    Release { src: u32, dst: u32 },

    /// Ownership is acquired by `dst` from `src`.
    Acquire { src: u32, dst: u32 },
}

#[derive(Clone, Debug)]
pub(crate) struct Access {
    resource: TrackedResource,
    ranges: SmallVec<[Range<DeviceSize>; 4]>,
    kind: AccessKind,
    stages: PipelineStages,
    write: bool,
}

/// The state that is kept while a command buffer is recorded.
#[derive(Debug)]
pub struct RecordingState {
    queue_family_index: u32,
    layouts: HashMap<Id<Image>, RangeMap<DeviceSize, LocalLayout>>,
    accesses: Vec<Access>,
    references: Vec<Id>,
    referenced: HashSet<Id>,
    render_pass: Option<RenderPassInstance>,
}

impl RecordingState {
    pub(crate) fn new(queue_family_index: u32) -> Self {
        RecordingState {
            queue_family_index,
            layouts: HashMap::default(),
            accesses: Vec::new(),
            references: Vec::new(),
            referenced: HashSet::default(),
            render_pass: None,
        }
    }

    /// Returns the queue family that the command buffer is recorded for.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the render pass instance that is active, if any.
    #[inline]
    pub fn render_pass(&self) -> Option<&RenderPassInstance> {
        self.render_pass.as_ref()
    }

    pub(crate) fn set_render_pass(&mut self, render_pass: Option<RenderPassInstance>) {
        self.render_pass = render_pass;
    }

    pub(crate) fn take_render_pass(&mut self) -> Option<RenderPassInstance> {
        self.render_pass.take()
    }

    /// Returns the objects that the commands recorded so far reference, in order of first
    /// reference.
    #[inline]
    pub fn references(&self) -> &[Id] {
        &self.references
    }

    pub(crate) fn reference(&mut self, id: Id) {
        if self.referenced.insert(id) {
            self.references.push(id);
        }
    }

    /// Returns the local layout of the subresource with the given flattened index, if a command
    /// recorded so far has used it.
    pub fn local_layout(&self, image: Id<Image>, index: DeviceSize) -> Option<LocalLayout> {
        self.layouts.get(&image)?.get(&index).copied()
    }

    /// Returns the first layout, among the subresources in `subresource_range` whose layout is
    /// known locally, that differs from `layout`.
    pub fn layout_mismatch(
        &self,
        image: &Image,
        subresource_range: &ImageSubresourceRange,
        layout: ImageLayout,
    ) -> Option<ImageLayout> {
        let local = self.layouts.get(&image.id())?;

        for range in image.iter_ranges(subresource_range) {
            if let Some((_, mismatch)) = local
                .overlapping(&range)
                .find(|(_, local)| local.current != layout)
            {
                return Some(mismatch.current);
            }
        }

        None
    }

    /// Transitions the subresources to `new_layout`. Subresources that are not known locally
    /// are expected to be in `old_layout` unless it is `ImageLayout::Undefined`.
    pub(crate) fn transition(
        &mut self,
        image: &Image,
        subresource_range: &ImageSubresourceRange,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        let local = self.layouts.entry(image.id()).or_default();
        let expected = (old_layout != ImageLayout::Undefined).then_some(old_layout);

        for range in image.iter_ranges(subresource_range) {
            update_ranges(local, range, |previous| {
                Some(match previous {
                    Some(previous) => LocalLayout {
                        current: new_layout,
                        ..*previous
                    },
                    None => LocalLayout {
                        expected,
                        current: new_layout,
                    },
                })
            });
        }
    }

    /// Records that a command uses the subresources in `layout`. Subresources that are not known
    /// locally are expected to be in that layout.
    pub(crate) fn use_layout(
        &mut self,
        image: &Image,
        subresource_range: &ImageSubresourceRange,
        layout: ImageLayout,
    ) {
        let local = self.layouts.entry(image.id()).or_default();

        for range in image.iter_ranges(subresource_range) {
            update_ranges(local, range, |previous| match previous {
                Some(_) => None,
                None => Some(LocalLayout {
                    expected: Some(layout),
                    current: layout,
                }),
            });
        }
    }

    pub(crate) fn image_access(
        &mut self,
        image: &Image,
        subresource_range: &ImageSubresourceRange,
        kind: AccessKind,
        stages: PipelineStages,
        write: bool,
    ) {
        self.reference(image.id().erase());
        self.accesses.push(Access {
            resource: TrackedResource::Image(image.id()),
            ranges: image.iter_ranges(subresource_range),
            kind,
            stages,
            write,
        });
    }

    pub(crate) fn buffer_access(
        &mut self,
        buffer: &Buffer,
        kind: AccessKind,
        stages: PipelineStages,
        write: bool,
    ) {
        self.reference(buffer.id().erase());
        self.accesses.push(Access {
            resource: TrackedResource::Buffer(buffer.id()),
            ranges: SmallVec::from_elem(0..1, 1),
            kind,
            stages,
            write,
        });
    }

    pub(crate) fn finish(self) -> CommandBufferLog {
        let mut layouts: Vec<_> = self.layouts.into_iter().collect();
        layouts.sort_unstable_by_key(|(id, _)| *id);

        CommandBufferLog {
            queue_family_index: self.queue_family_index,
            layouts,
            accesses: self.accesses,
            references: self.references,
        }
    }
}

/// What a command buffer does to the resources it uses, as recorded.
#[derive(Debug)]
pub struct CommandBufferLog {
    queue_family_index: u32,
    layouts: Vec<(Id<Image>, RangeMap<DeviceSize, LocalLayout>)>,
    accesses: Vec<Access>,
    references: Vec<Id>,
}

impl CommandBufferLog {
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Returns the objects that the command buffer references.
    #[inline]
    pub fn references(&self) -> &[Id] {
        &self.references
    }

    /// Returns the local layouts of the subresources of `image` at the end of the command
    /// buffer.
    pub fn layouts(&self, image: Id<Image>) -> Vec<(Range<DeviceSize>, LocalLayout)> {
        self.layouts
            .iter()
            .find(|(id, _)| *id == image)
            .map(|(_, local)| {
                local
                    .iter()
                    .map(|(range, local)| (range.clone(), *local))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FindingKind {
    /// The layout that the command buffer expects differs from the tracked layout.
    InvalidLayout,

    /// The resource is used by a queue family that doesn't own it.
    Ownership,

    /// Ownership is acquired without a matching release.
    AcquireUnreleased,

    /// Ownership is released twice without an acquire in between.
    DuplicateRelease,
}

#[derive(Clone, Debug)]
pub(crate) struct Finding {
    pub(crate) kind: FindingKind,
    pub(crate) resource: TrackedResource,
    pub(crate) message: String,
}

impl Finding {
    pub(crate) fn violation(&self) -> Violation {
        Violation::new(self.message.clone()).object(self.resource.erase())
    }
}

/// The result of replaying a command buffer log against the tracked state.
#[derive(Default)]
pub struct ReplayReport {
    findings: Vec<Finding>,
    images: Vec<(Arc<Image>, RangeMap<DeviceSize, SubresourceState>)>,
    buffers: Vec<(Arc<Buffer>, RangeMap<DeviceSize, SubresourceState>)>,
}

impl ReplayReport {
    pub(crate) fn findings(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(move |finding| finding.kind == kind)
    }

    /// Returns whether the replay found no inconsistencies.
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Writes the state that the resources are in after the command buffer into the tracked
    /// state.
    pub(crate) fn apply(&self) {
        for (image, ranges) in &self.images {
            trace!("merged the state of {:?}", image.id());
            image.tracked_state().replace(ranges.clone());
        }

        for (buffer, ranges) in &self.buffers {
            trace!("merged the state of {:?}", buffer.id());
            buffer.tracked_state().replace(ranges.clone());
        }
    }
}

impl fmt::Debug for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayReport")
            .field("findings", &self.findings)
            .field("images", &self.images.len())
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

/// An image or buffer whose subresources are tracked.
pub trait Tracked: Object {
    fn tracked_state(&self) -> &TrackedState;

    fn sharing(&self) -> &Sharing<SmallVec<[u32; 4]>>;
}

impl Tracked for Image {
    #[inline]
    fn tracked_state(&self) -> &TrackedState {
        self.state()
    }

    #[inline]
    fn sharing(&self) -> &Sharing<SmallVec<[u32; 4]>> {
        Image::sharing(self)
    }
}

impl Tracked for Buffer {
    #[inline]
    fn tracked_state(&self) -> &TrackedState {
        self.state()
    }

    #[inline]
    fn sharing(&self) -> &Sharing<SmallVec<[u32; 4]>> {
        Buffer::sharing(self)
    }
}

/// The state of a resource while a log is replayed.
struct Working<T> {
    resource: Arc<T>,
    ranges: RangeMap<DeviceSize, SubresourceState>,
}

impl<T: Tracked> Working<T> {
    fn apply(&mut self, access: &Access, queue_family_index: u32) -> Option<(FindingKind, String)> {
        apply_access(
            &mut self.ranges,
            self.resource.sharing(),
            access,
            queue_family_index,
        )
    }
}

fn working<'m, T: Tracked>(
    map: &'m mut HashMap<Id<T>, Working<T>>,
    resources: &Resources,
    id: Id<T>,
) -> Option<&'m mut Working<T>> {
    if !map.contains_key(&id) {
        let resource = resources.get(id).ok()?;
        let ranges = resource.tracked_state().snapshot();
        map.insert(id, Working { resource, ranges });
    }

    map.get_mut(&id)
}

fn is_external(queue_family_index: u32) -> bool {
    queue_family_index == QUEUE_FAMILY_EXTERNAL || queue_family_index == QUEUE_FAMILY_FOREIGN
}

/// Applies one access to the working state of a resource, returning the inconsistency it
/// causes, if any.
fn apply_access(
    ranges: &mut RangeMap<DeviceSize, SubresourceState>,
    sharing: &Sharing<SmallVec<[u32; 4]>>,
    access: &Access,
    queue_family_index: u32,
) -> Option<(FindingKind, String)> {
    let mut finding = None;

    for range in &access.ranges {
        update_ranges(ranges, range.clone(), |state| {
            let mut state = *state?;

            let problem = match access.kind {
                AccessKind::Use => use_resource(&mut state, sharing, queue_family_index),
                AccessKind::Barrier => None,
                AccessKind::Release { src, dst } => release(&mut state, src, dst),
                AccessKind::Acquire { src, dst } => acquire(&mut state, src, dst),
            };

            if finding.is_none() {
                finding = problem;
            }

            if access.write {
                state.last_write = access.stages;
                state.last_read = PipelineStages::empty();
            } else {
                state.last_read |= access.stages;
            }

            Some(state)
        });
    }

    finding
}

fn use_resource(
    state: &mut SubresourceState,
    sharing: &Sharing<SmallVec<[u32; 4]>>,
    queue_family_index: u32,
) -> Option<(FindingKind, String)> {
    if let Sharing::Concurrent(indices) = sharing {
        if !indices.contains(&queue_family_index) {
            return Some((
                FindingKind::Ownership,
                format!(
                    "the resource has concurrent sharing between queue families {indices:?}, but \
                    is used on queue family {queue_family_index}",
                ),
            ));
        }

        return None;
    }

    match state.owner {
        QueueFamilyOwnership::Ignored => {
            state.owner = QueueFamilyOwnership::Owned(queue_family_index);
            None
        }
        QueueFamilyOwnership::Owned(owner) if owner == queue_family_index => None,
        QueueFamilyOwnership::Owned(owner) => Some((
            FindingKind::Ownership,
            format!(
                "the resource is owned by queue family {owner}, but is used on queue family \
                {queue_family_index} without an ownership transfer",
            ),
        )),
        QueueFamilyOwnership::Released { src, dst } => Some((
            FindingKind::Ownership,
            format!(
                "ownership of the resource was released from queue family {src} to queue family \
                {dst} and not yet acquired, but it is used on queue family {queue_family_index}",
            ),
        )),
    }
}

fn release(state: &mut SubresourceState, src: u32, dst: u32) -> Option<(FindingKind, String)> {
    let problem = match state.owner {
        QueueFamilyOwnership::Released {
            src: released_src,
            dst: released_dst,
        } => Some((
            FindingKind::DuplicateRelease,
            format!(
                "ownership of the resource is released from queue family {src} to queue family \
                {dst}, but it was already released from queue family {released_src} to queue \
                family {released_dst} and not acquired since",
            ),
        )),
        QueueFamilyOwnership::Owned(owner) if owner != src => Some((
            FindingKind::Ownership,
            format!(
                "ownership of the resource is released from queue family {src}, but it is owned \
                by queue family {owner}",
            ),
        )),
        _ => None,
    };

    state.owner = QueueFamilyOwnership::Released { src, dst };

    problem
}

fn acquire(state: &mut SubresourceState, src: u32, dst: u32) -> Option<(FindingKind, String)> {
    let problem = match state.owner {
        QueueFamilyOwnership::Released {
            src: released_src,
            dst: released_dst,
        } if released_src == src && released_dst == dst => None,
        _ if is_external(src) => None,
        owner => Some((
            FindingKind::AcquireUnreleased,
            format!(
                "ownership of the resource is acquired by queue family {dst} from queue family \
                {src}, but no matching release was submitted (the resource is {owner:?})",
            ),
        )),
    };

    state.owner = QueueFamilyOwnership::Owned(dst);

    problem
}

/// Replays a command buffer log against the current tracked state of the resources it uses.
pub(crate) fn replay(resources: &Resources, log: &CommandBufferLog) -> ReplayReport {
    let mut findings = Vec::new();
    let mut images: HashMap<Id<Image>, Working<Image>> = HashMap::default();
    let mut buffers: HashMap<Id<Buffer>, Working<Buffer>> = HashMap::default();

    for (id, local) in &log.layouts {
        let Some(working) = working(&mut images, resources, *id) else {
            continue;
        };

        let mismatch = local.iter().find_map(|(range, local)| {
            let expected = local.expected?;

            working
                .ranges
                .overlapping(range)
                .find(|(_, state)| state.layout != expected)
                .map(|(part, state)| {
                    (
                        part.start.max(range.start)..part.end.min(range.end),
                        expected,
                        state.layout,
                    )
                })
        });

        if let Some((range, expected, actual)) = mismatch {
            findings.push(Finding {
                kind: FindingKind::InvalidLayout,
                resource: TrackedResource::Image(*id),
                message: format!(
                    "the command buffer expects subresources {range:?} of the image to be in \
                    layout `{expected:?}` when it starts executing, but they are in layout \
                    `{actual:?}`",
                ),
            });
        }
    }

    for access in &log.accesses {
        let problem = match access.resource {
            TrackedResource::Image(id) => working(&mut images, resources, id)
                .and_then(|working| working.apply(access, log.queue_family_index)),
            TrackedResource::Buffer(id) => working(&mut buffers, resources, id)
                .and_then(|working| working.apply(access, log.queue_family_index)),
        };

        if let Some((kind, message)) = problem {
            // One finding of each kind per resource is enough.
            if !findings
                .iter()
                .any(|finding| finding.kind == kind && finding.resource == access.resource)
            {
                findings.push(Finding {
                    kind,
                    resource: access.resource,
                    message,
                });
            }
        }
    }

    for (id, local) in &log.layouts {
        let Some(working) = images.get_mut(id) else {
            continue;
        };

        for (range, local) in local.iter() {
            update_ranges(&mut working.ranges, range.clone(), |state| {
                Some(SubresourceState {
                    layout: local.current,
                    ..*state?
                })
            });
        }
    }

    let mut images: Vec<_> = images
        .into_values()
        .map(|working| (working.resource, working.ranges))
        .collect();
    images.sort_unstable_by_key(|(image, _)| image.id());
    let mut buffers: Vec<_> = buffers
        .into_values()
        .map(|working| (working.resource, working.ranges))
        .collect();
    buffers.sort_unstable_by_key(|(buffer, _)| buffer.id());

    ReplayReport {
        findings,
        images,
        buffers,
    }
}

/// The context of the submission of a single command buffer.
pub struct SubmissionContext<'a> {
    queue: Queue,
    command_buffer: &'a CommandBuffer,
    resources: &'a Resources,
    report: OnceLock<ReplayReport>,
}

impl<'a> SubmissionContext<'a> {
    pub(crate) fn new(
        queue: Queue,
        command_buffer: &'a CommandBuffer,
        resources: &'a Resources,
    ) -> Self {
        SubmissionContext {
            queue,
            command_buffer,
            resources,
            report: OnceLock::new(),
        }
    }

    /// Returns the queue that the command buffer is submitted to.
    #[inline]
    pub fn queue(&self) -> Queue {
        self.queue
    }

    #[inline]
    pub fn command_buffer(&self) -> &'a CommandBuffer {
        self.command_buffer
    }

    /// Returns the result of replaying the command buffer against the tracked state. It is
    /// computed on first use.
    pub fn report(&self) -> &ReplayReport {
        self.report.get_or_init(|| match self.command_buffer.log() {
            Some(log) => replay(self.resources, &log),
            None => ReplayReport::default(),
        })
    }
}

impl fmt::Debug for SubmissionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionContext")
            .field("queue", &self.queue)
            .field("command_buffer", &self.command_buffer.id())
            .field("report", &self.report.get())
            .finish_non_exhaustive()
    }
}

pub(crate) fn barrier_old_layout(ctx: &RuleContext<'_>) -> RuleResult {
    let (Operation::PipelineBarrier(dependency_info), Some(recording)) =
        (ctx.operation(), ctx.recording())
    else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (barrier_index, barrier) in dependency_info.image_memory_barriers.iter().enumerate() {
        if barrier.old_layout == ImageLayout::Undefined {
            continue;
        }

        let Ok(image) = ctx.resources().get(barrier.image) else {
            continue;
        };

        if let Some(current) =
            recording.layout_mismatch(&image, &barrier.subresource_range, barrier.old_layout)
        {
            violations.push(
                Violation::new(format!(
                    "`image_memory_barriers[{barrier_index}].old_layout` is `{:?}`, but the \
                    subresources are in layout `{current:?}` at this point of the command buffer",
                    barrier.old_layout,
                ))
                .object(barrier.image),
            );
        }
    }

    violations.into_result()
}

fn submission_findings(
    ctx: &RuleContext<'_>,
    kind: FindingKind,
    images: bool,
) -> RuleResult {
    let Some(submission) = ctx.submission() else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for finding in submission.report().findings(kind) {
        if matches!(finding.resource, TrackedResource::Image(_)) == images {
            violations.push(finding.violation());
        }
    }

    violations.into_result()
}

pub(crate) fn submit_layout(ctx: &RuleContext<'_>) -> RuleResult {
    submission_findings(ctx, FindingKind::InvalidLayout, true)
}

pub(crate) fn submit_ownership(ctx: &RuleContext<'_>) -> RuleResult {
    let mut violations = Violations::new();

    for images in [true, false] {
        if let Err(found) = submission_findings(ctx, FindingKind::Ownership, images) {
            violations.extend(found);
        }
    }

    violations.into_result()
}

pub(crate) fn submit_image_acquire_unreleased(ctx: &RuleContext<'_>) -> RuleResult {
    submission_findings(ctx, FindingKind::AcquireUnreleased, true)
}

pub(crate) fn submit_buffer_acquire_unreleased(ctx: &RuleContext<'_>) -> RuleResult {
    submission_findings(ctx, FindingKind::AcquireUnreleased, false)
}

pub(crate) fn submit_image_duplicate_release(ctx: &RuleContext<'_>) -> RuleResult {
    submission_findings(ctx, FindingKind::DuplicateRelease, true)
}

pub(crate) fn submit_buffer_duplicate_release(ctx: &RuleContext<'_>) -> RuleResult {
    submission_findings(ctx, FindingKind::DuplicateRelease, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::{BufferCreateInfo, BufferUsage},
        command_buffer::ClearColorImageInfo,
        format::Format,
        image::{ImageAspects, ImageCreateInfo},
        sync::{
            BufferMemoryBarrier, DependencyInfo, ImageMemoryBarrier, QueueFamilyOwnershipTransfer,
        },
        tests::{bound_buffer, bound_image, color_image_info},
        ErrorKind,
    };

    #[test]
    fn update_ranges_fills_gaps() {
        let mut map = RangeMap::new();
        map.insert(2..4, 1u32);

        update_ranges(&mut map, 0..6, |value| Some(value.map_or(0, |value| value + 10)));

        assert_eq!(
            map.iter().map(|(r, v)| (r.clone(), *v)).collect::<Vec<_>>(),
            [(0..2, 0), (2..4, 11), (4..6, 0)],
        );
    }

    #[test]
    fn local_layouts() {
        let (device, monitor) = test_device!();
        let image = device
            .create_image(&monitor, color_image_info(Format::R8G8B8A8_UNORM, [16, 16, 1]))
            .unwrap();
        let image = device.resources().get(image).unwrap();

        let mut recording = RecordingState::new(0);
        let first = ImageSubresourceRange {
            aspects: ImageAspects::COLOR,
            mip_levels: 0..1,
            array_layers: 0..1,
        };

        recording.use_layout(&image, &first, ImageLayout::TransferDstOptimal);
        recording.transition(
            &image,
            &first,
            ImageLayout::TransferDstOptimal,
            ImageLayout::ShaderReadOnlyOptimal,
        );

        assert_eq!(
            recording.local_layout(image.id(), 0),
            Some(LocalLayout {
                expected: Some(ImageLayout::TransferDstOptimal),
                current: ImageLayout::ShaderReadOnlyOptimal,
            }),
        );
        assert_eq!(
            recording.layout_mismatch(&image, &first, ImageLayout::TransferDstOptimal),
            Some(ImageLayout::ShaderReadOnlyOptimal),
        );
        assert_eq!(
            recording.layout_mismatch(&image, &first, ImageLayout::ShaderReadOnlyOptimal),
            None,
        );
    }

    fn to_general(image: Id<Image>) -> DependencyInfo {
        DependencyInfo {
            image_memory_barriers: [ImageMemoryBarrier {
                new_layout: ImageLayout::General,
                ..ImageMemoryBarrier::image(image)
            }]
            .into_iter()
            .collect(),
            ..Default::default()
        }
    }

    fn clear_in_general(
        device: &crate::device::Device,
        monitor: &crate::monitor::ErrorMonitor,
        queue: Queue,
        image: Id<Image>,
    ) -> Id<CommandBuffer> {
        let mut builder = device.begin_command_buffer(monitor, queue).unwrap();
        builder.pipeline_barrier(monitor, &to_general(image)).unwrap();
        builder
            .clear_color_image(
                monitor,
                &ClearColorImageInfo {
                    image_layout: ImageLayout::General,
                    ..ClearColorImageInfo::image(image)
                },
            )
            .unwrap();

        builder.end(monitor).unwrap()
    }

    #[test]
    fn old_layout_mismatch_in_command_buffer() {
        let (device, monitor) = test_device!();
        let image = bound_image(
            &device,
            &monitor,
            color_image_info(Format::R8G8B8A8_UNORM, [16, 16, 1]),
        );

        let mut builder = device.begin_command_buffer(&monitor, device.queue(0, 0)).unwrap();
        builder
            .pipeline_barrier(
                &monitor,
                &DependencyInfo {
                    image_memory_barriers: [ImageMemoryBarrier {
                        new_layout: ImageLayout::TransferDstOptimal,
                        ..ImageMemoryBarrier::image(image)
                    }]
                    .into_iter()
                    .collect(),
                    ..Default::default()
                },
            )
            .unwrap();

        monitor.expect("VUID-VkImageMemoryBarrier-oldLayout-01197");
        let err = builder
            .pipeline_barrier(
                &monitor,
                &DependencyInfo {
                    image_memory_barriers: [ImageMemoryBarrier {
                        old_layout: ImageLayout::General,
                        new_layout: ImageLayout::ShaderReadOnlyOptimal,
                        ..ImageMemoryBarrier::image(image)
                    }]
                    .into_iter()
                    .collect(),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayoutMismatch);
        monitor.verify_found().unwrap();

        // The transition is recorded despite the mismatch.
        assert_eq!(
            builder.state().local_layout(image, 0),
            Some(LocalLayout {
                expected: None,
                current: ImageLayout::ShaderReadOnlyOptimal,
            }),
        );
    }

    #[test]
    fn layouts_merge_at_submission() {
        let (device, monitor) = test_device!();
        let queue = device.queue(0, 0);
        let image = bound_image(
            &device,
            &monitor,
            color_image_info(Format::R8G8B8A8_UNORM, [16, 16, 1]),
        );

        let mut builder = device.begin_command_buffer(&monitor, queue).unwrap();
        builder
            .pipeline_barrier(
                &monitor,
                &DependencyInfo {
                    image_memory_barriers: [ImageMemoryBarrier {
                        new_layout: ImageLayout::TransferDstOptimal,
                        ..ImageMemoryBarrier::image(image)
                    }]
                    .into_iter()
                    .collect(),
                    ..Default::default()
                },
            )
            .unwrap();
        builder
            .clear_color_image(&monitor, &ClearColorImageInfo::image(image))
            .unwrap();
        let first = builder.end(&monitor).unwrap();

        // Nothing changes until the command buffer is submitted.
        let record = device.resources().get(image).unwrap();
        assert_eq!(record.state().get(0).unwrap().layout, ImageLayout::Undefined);

        monitor.expect_success();
        device.queue_submit(&monitor, queue, &[first]).unwrap();
        monitor.verify_found().unwrap();

        let state = record.state().get(0).unwrap();
        assert_eq!(state.layout, ImageLayout::TransferDstOptimal);
        assert_eq!(state.owner, QueueFamilyOwnership::Owned(0));
        assert_eq!(state.last_write, PipelineStages::ALL_TRANSFER);

        // A second command buffer that assumes a different layout is diagnosed at submission.
        let mut builder = device.begin_command_buffer(&monitor, queue).unwrap();
        builder
            .clear_color_image(
                &monitor,
                &ClearColorImageInfo {
                    image_layout: ImageLayout::General,
                    ..ClearColorImageInfo::image(image)
                },
            )
            .unwrap();
        let second = builder.end(&monitor).unwrap();

        monitor.expect("UNASSIGNED-CoreValidation-DrawState-InvalidImageLayout");
        let err = device.queue_submit(&monitor, queue, &[second]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayoutMismatch);
        monitor.verify_found().unwrap();

        // The state advances regardless.
        assert_eq!(record.state().get(0).unwrap().layout, ImageLayout::General);
    }

    #[test]
    fn exclusive_ownership() {
        let (device, monitor) = test_device!();
        let image = bound_image(
            &device,
            &monitor,
            color_image_info(Format::R8G8B8A8_UNORM, [16, 16, 1]),
        );

        let first_queue = device.queue(0, 0);
        let first = clear_in_general(&device, &monitor, first_queue, image);
        let second_queue = device.queue(1, 0);
        let second = clear_in_general(&device, &monitor, second_queue, image);

        monitor.expect_success();
        device.queue_submit(&monitor, first_queue, &[first]).unwrap();
        monitor.verify_found().unwrap();

        monitor.expect("VUID-vkQueueSubmit-pSubmits-04626");
        let err = device
            .queue_submit(&monitor, second_queue, &[second])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OwnershipViolation);
        monitor.verify_found().unwrap();
    }

    #[test]
    fn concurrent_ownership() {
        let (device, monitor) = test_device!();
        let image = bound_image(
            &device,
            &monitor,
            ImageCreateInfo {
                sharing: Sharing::Concurrent(SmallVec::from_slice(&[0, 1])),
                ..color_image_info(Format::R8G8B8A8_UNORM, [16, 16, 1])
            },
        );

        let allowed_queue = device.queue(1, 0);
        let allowed = clear_in_general(&device, &monitor, allowed_queue, image);

        monitor.expect_success();
        device.queue_submit(&monitor, allowed_queue, &[allowed]).unwrap();
        monitor.verify_found().unwrap();

        let queue = device.queue(2, 0);
        let command_buffer = clear_in_general(&device, &monitor, queue, image);

        monitor.expect("VUID-vkQueueSubmit-pSubmits-04626");
        assert!(device
            .queue_submit(&monitor, queue, &[command_buffer])
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn release_and_acquire() {
        let (device, monitor) = test_device!();
        let buffer = bound_buffer(
            &device,
            &monitor,
            BufferCreateInfo {
                size: 64,
                usage: BufferUsage::TRANSFER_DST,
                ..Default::default()
            },
        );
        let barrier = |src_index, dst_index| DependencyInfo {
            buffer_memory_barriers: [BufferMemoryBarrier {
                queue_family_ownership_transfer: Some(
                    QueueFamilyOwnershipTransfer::ExclusiveBetweenLocal {
                        src_index,
                        dst_index,
                    },
                ),
                ..BufferMemoryBarrier::buffer(buffer)
            }]
            .into_iter()
            .collect(),
            ..Default::default()
        };

        let queue = device.queue(1, 0);
        let mut builder = device.begin_command_buffer(&monitor, queue).unwrap();
        builder.pipeline_barrier(&monitor, &barrier(0, 1)).unwrap();
        let acquire = builder.end(&monitor).unwrap();

        // Acquiring without a release from queue family 0.
        monitor.expect("UNASSIGNED-VkBufferMemoryBarrier-buffer-00004");
        assert!(device.queue_submit(&monitor, queue, &[acquire]).is_err());
        monitor.verify_found().unwrap();
        device.queue_wait_idle(queue);

        let buffer_record = device.resources().get(buffer).unwrap();
        assert_eq!(
            buffer_record.state().get(0).unwrap().owner,
            QueueFamilyOwnership::Owned(1),
        );

        let mut builder = device.begin_command_buffer(&monitor, queue).unwrap();
        builder.pipeline_barrier(&monitor, &barrier(1, 0)).unwrap();
        let release = builder.end(&monitor).unwrap();

        monitor.expect_success();
        device.queue_submit(&monitor, queue, &[release]).unwrap();
        monitor.verify_found().unwrap();
        device.queue_wait_idle(queue);

        assert_eq!(
            buffer_record.state().get(0).unwrap().owner,
            QueueFamilyOwnership::Released { src: 1, dst: 0 },
        );

        // Releasing again without an acquire in between.
        monitor.expect("UNASSIGNED-VkBufferMemoryBarrier-buffer-00003");
        assert!(device.queue_submit(&monitor, queue, &[release]).is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn use_after_release_without_acquire() {
        let (device, monitor) = test_device!();
        let buffer = bound_buffer(
            &device,
            &monitor,
            BufferCreateInfo {
                size: 64,
                usage: BufferUsage::TRANSFER_DST,
                ..Default::default()
            },
        );

        // Release from queue family 1 to queue family 2.
        let release_queue = device.queue(1, 0);
        let mut builder = device.begin_command_buffer(&monitor, release_queue).unwrap();
        builder
            .pipeline_barrier(
                &monitor,
                &DependencyInfo {
                    buffer_memory_barriers: [BufferMemoryBarrier {
                        queue_family_ownership_transfer: Some(
                            QueueFamilyOwnershipTransfer::ExclusiveBetweenLocal {
                                src_index: 1,
                                dst_index: 2,
                            },
                        ),
                        ..BufferMemoryBarrier::buffer(buffer)
                    }]
                    .into_iter()
                    .collect(),
                    ..Default::default()
                },
            )
            .unwrap();
        let release = builder.end(&monitor).unwrap();

        monitor.expect_success();
        device.queue_submit(&monitor, release_queue, &[release]).unwrap();
        monitor.verify_found().unwrap();

        // Queue family 0 uses the buffer without acquiring it.
        let queue = device.queue(0, 0);
        let mut builder = device.begin_command_buffer(&monitor, queue).unwrap();
        builder.fill_buffer(&monitor, buffer, 0).unwrap();
        let fill = builder.end(&monitor).unwrap();

        monitor.expect("VUID-vkQueueSubmit-pSubmits-04626");
        let err = device.queue_submit(&monitor, queue, &[fill]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OwnershipViolation);
        monitor.verify_found().unwrap();
    }
}
