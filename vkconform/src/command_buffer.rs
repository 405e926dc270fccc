//! Recording commands into command buffers, and the rules that apply to them.
//!
//! A command buffer is recorded through a [`RecordingCommandBuffer`], which is returned by
//! [`Device::begin_command_buffer`]. Every command is validated against the state that the
//! command buffer has built up so far, and is then recorded into the transition log of the
//! command buffer. No state outside the command buffer is touched until it is submitted, at
//! which point the log is replayed against the tracked state of the resources.
//!
//! A command that fails validation is not recorded, with one exception: a barrier whose only
//! findings are layout mismatches still performs its transitions.
//!
//! [`Device::begin_command_buffer`]: crate::device::Device::begin_command_buffer

use crate::{
    buffer::{Buffer, BufferUsage},
    device::{Device, Queue, Validation},
    image::{Image, ImageLayout, ImageSubresourceRange, ImageUsage, ImageView},
    monitor::DiagnosticSink,
    render_pass::{FramebufferAttachments, RenderPassBeginInfo, RenderPassInstance},
    rules::{Operation, RuleContext, RuleResult, Violation, Violations},
    sync::{DependencyInfo, PipelineStages, QueueFamilyOwnershipTransfer},
    tracker::{AccessKind, CommandBufferLog, RecordingState},
    Error, Id, NonExhaustive, Object, ObjectType,
};
use log::trace;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{fmt, sync::Arc};

/// Usage flags of a command buffer, which determine how often it can be submitted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CommandBufferUsage {
    /// The command buffer can only be submitted once. After it has executed, it becomes invalid.
    OneTimeSubmit,

    /// The command buffer can be submitted multiple times, but must not be pending when it is
    /// submitted again.
    #[default]
    MultipleSubmit,

    /// The command buffer can be submitted multiple times, even while it is already pending.
    SimultaneousUse,
}

/// The lifecycle state of a command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandBufferStatus {
    Initial,
    Recording,
    Executable,
    Pending,
    Invalid,
}

/// Parameters to begin recording a command buffer.
#[derive(Clone, Debug, Default)]
pub struct CommandBufferBeginInfo {
    /// The default value is [`CommandBufferUsage::MultipleSubmit`].
    pub usage: CommandBufferUsage,

    /// An existing command buffer to record again. Its previous contents are discarded.
    ///
    /// The default value is `None`, which allocates a new command buffer.
    pub command_buffer: Option<Id<CommandBuffer>>,

    pub _ne: NonExhaustive,
}

#[derive(Debug)]
struct CommandBufferState {
    status: CommandBufferStatus,
    usage: CommandBufferUsage,
    log: Option<Arc<CommandBufferLog>>,
    pending: u32,
}

/// The record of a command buffer that was allocated on a device.
#[derive(Debug)]
pub struct CommandBuffer {
    id: Id<CommandBuffer>,
    queue_family_index: u32,
    state: Mutex<CommandBufferState>,
}

impl CommandBuffer {
    pub(crate) fn new(id: Id<CommandBuffer>, queue_family_index: u32) -> Self {
        CommandBuffer {
            id,
            queue_family_index,
            state: Mutex::new(CommandBufferState {
                status: CommandBufferStatus::Initial,
                usage: CommandBufferUsage::default(),
                log: None,
                pending: 0,
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> Id<CommandBuffer> {
        self.id
    }

    /// Returns the queue family that the command buffer was allocated for.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    #[inline]
    pub fn status(&self) -> CommandBufferStatus {
        self.state.lock().status
    }

    /// Returns the usage that the command buffer was last recorded with.
    #[inline]
    pub fn usage(&self) -> CommandBufferUsage {
        self.state.lock().usage
    }

    /// Returns the transition log of the last completed recording.
    #[inline]
    pub fn log(&self) -> Option<Arc<CommandBufferLog>> {
        self.state.lock().log.clone()
    }

    /// Returns whether the command buffer can be submitted in its current state.
    pub fn is_submittable(&self) -> bool {
        let state = self.state.lock();

        match state.status {
            CommandBufferStatus::Executable => true,
            CommandBufferStatus::Pending => state.usage == CommandBufferUsage::SimultaneousUse,
            _ => false,
        }
    }

    pub(crate) fn begin(&self, usage: CommandBufferUsage) {
        let mut state = self.state.lock();
        state.status = CommandBufferStatus::Recording;
        state.usage = usage;
        state.log = None;
    }

    pub(crate) fn finish(&self, log: CommandBufferLog) {
        let mut state = self.state.lock();
        state.status = CommandBufferStatus::Executable;
        state.log = Some(Arc::new(log));
    }

    pub(crate) fn submitted(&self) {
        let mut state = self.state.lock();
        state.status = CommandBufferStatus::Pending;
        state.pending += 1;
    }

    /// Marks one submission of the command buffer as complete.
    pub(crate) fn retire(&self) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);

        if state.pending == 0 && state.status == CommandBufferStatus::Pending {
            state.status = match state.usage {
                CommandBufferUsage::OneTimeSubmit => CommandBufferStatus::Invalid,
                _ => CommandBufferStatus::Executable,
            };
        }
    }
}

impl Object for CommandBuffer {
    const TYPE: ObjectType = ObjectType::CommandBuffer;

    fn storage(resources: &crate::resource::Resources) -> &crate::resource::Storage<Self> {
        &resources.command_buffers
    }
}

/// Parameters to clear a color image.
#[derive(Clone, Debug)]
pub struct ClearColorImageInfo {
    /// The image to clear.
    ///
    /// There is no default value.
    pub image: Id<Image>,

    /// The layout that the image is in when it is cleared. It must be
    /// [`ImageLayout::TransferDstOptimal`] or [`ImageLayout::General`].
    ///
    /// The default value is [`ImageLayout::TransferDstOptimal`].
    pub image_layout: ImageLayout,

    /// The subresource ranges to clear.
    ///
    /// The default value is empty, which clears the whole image.
    pub regions: SmallVec<[ImageSubresourceRange; 1]>,

    pub _ne: NonExhaustive,
}

impl ClearColorImageInfo {
    /// Returns a `ClearColorImageInfo` that clears the whole of `image`.
    #[inline]
    pub fn image(image: Id<Image>) -> Self {
        ClearColorImageInfo {
            image,
            image_layout: ImageLayout::TransferDstOptimal,
            regions: SmallVec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

/// Parameters to copy data from a buffer to an image.
#[derive(Clone, Debug)]
pub struct CopyBufferToImageInfo {
    /// The buffer to copy from.
    ///
    /// There is no default value.
    pub src_buffer: Id<Buffer>,

    /// The image to copy to.
    ///
    /// There is no default value.
    pub dst_image: Id<Image>,

    /// The layout of `dst_image` during the copy. It must be
    /// [`ImageLayout::TransferDstOptimal`] or [`ImageLayout::General`].
    ///
    /// The default value is [`ImageLayout::TransferDstOptimal`].
    pub dst_image_layout: ImageLayout,

    /// The subresource ranges of `dst_image` to copy to.
    ///
    /// The default value is empty, which copies to the whole image.
    pub regions: SmallVec<[ImageSubresourceRange; 1]>,

    pub _ne: NonExhaustive,
}

impl CopyBufferToImageInfo {
    /// Returns a `CopyBufferToImageInfo` that copies to the whole of `dst_image`.
    #[inline]
    pub fn buffer_image(src_buffer: Id<Buffer>, dst_image: Id<Image>) -> Self {
        CopyBufferToImageInfo {
            src_buffer,
            dst_image,
            dst_image_layout: ImageLayout::TransferDstOptimal,
            regions: SmallVec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

/// Returns `regions`, or the whole image if it is empty.
fn regions_or_whole(
    image: &Image,
    regions: &[ImageSubresourceRange],
) -> SmallVec<[ImageSubresourceRange; 1]> {
    if regions.is_empty() {
        SmallVec::from_elem(image.subresource_range(), 1)
    } else {
        regions.iter().cloned().collect()
    }
}

/// A command buffer in the recording state.
///
/// Every command returns `Err` if it failed validation, in which case nothing was recorded
/// unless the failure was a layout mismatch of a barrier.
pub struct RecordingCommandBuffer<'a> {
    device: &'a Device,
    command_buffer: Arc<CommandBuffer>,
    state: RecordingState,
}

impl fmt::Debug for RecordingCommandBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingCommandBuffer")
            .field("command_buffer", &self.command_buffer.id())
            .field("queue_family_index", &self.command_buffer.queue_family_index())
            .finish_non_exhaustive()
    }
}

impl<'a> RecordingCommandBuffer<'a> {
    pub(crate) fn new(device: &'a Device, command_buffer: Arc<CommandBuffer>) -> Self {
        let state = RecordingState::new(command_buffer.queue_family_index());

        RecordingCommandBuffer {
            device,
            command_buffer,
            state,
        }
    }

    /// Returns the ID of the command buffer being recorded.
    #[inline]
    pub fn id(&self) -> Id<CommandBuffer> {
        self.command_buffer.id()
    }

    /// Returns the state that the commands recorded so far have built up.
    #[inline]
    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    fn evaluate(&self, sink: &dyn DiagnosticSink, operation: Operation<'_>) -> Validation {
        let ctx = RuleContext::new(
            self.device.resources(),
            self.device.environment(),
            operation,
        )
        .with_recording(&self.state);

        self.device.evaluate(sink, &ctx)
    }

    fn validate(&self, sink: &dyn DiagnosticSink, operation: Operation<'_>) -> Result<(), Error> {
        self.evaluate(sink, operation).into_result()
    }

    /// Determines what a barrier with the given ownership transfer does in this command buffer,
    /// and whether it performs its layout transition here.
    fn classify_barrier(
        &self,
        transfer: Option<QueueFamilyOwnershipTransfer>,
    ) -> (AccessKind, bool) {
        let Some(transfer) = transfer else {
            return (AccessKind::Barrier, true);
        };
        let (src, dst) = transfer.indices();

        if !transfer.is_exclusive() || src == dst {
            return (AccessKind::Barrier, true);
        }

        match transfer {
            QueueFamilyOwnershipTransfer::ExclusiveBetweenLocal { .. } => {
                if self.state.queue_family_index() == dst {
                    (AccessKind::Acquire { src, dst }, true)
                } else {
                    // The transition is performed once, by the acquiring queue family.
                    (AccessKind::Release { src, dst }, false)
                }
            }
            QueueFamilyOwnershipTransfer::ExclusiveToExternal { .. }
            | QueueFamilyOwnershipTransfer::ExclusiveToForeign { .. } => {
                (AccessKind::Release { src, dst }, true)
            }
            _ => (AccessKind::Acquire { src, dst }, true),
        }
    }

    /// Records a pipeline barrier, with its layout transitions and ownership transfers.
    ///
    /// A barrier whose old layout doesn't match the layout that the command buffer left the
    /// image in is still recorded, and the image is in the new layout afterwards. The mismatch is
    /// returned as an error.
    pub fn pipeline_barrier(
        &mut self,
        sink: &dyn DiagnosticSink,
        dependency_info: &DependencyInfo,
    ) -> Result<&mut Self, Error> {
        let Validation { error, structural } =
            self.evaluate(sink, Operation::PipelineBarrier(dependency_info));

        if structural {
            if let Some(err) = error {
                return Err(err);
            }
        }

        let resources = self.device.resources();

        for barrier in &dependency_info.image_memory_barriers {
            let image = resources.image(barrier.image)?;
            let (kind, transitions) = self.classify_barrier(barrier.queue_family_ownership_transfer);

            if transitions {
                trace!(
                    "{:?}: {:?} {:?} -> {:?}",
                    self.id(),
                    barrier.image,
                    barrier.old_layout,
                    barrier.new_layout,
                );
                self.state.transition(
                    &image,
                    &barrier.subresource_range,
                    barrier.old_layout,
                    barrier.new_layout,
                );
            }

            self.state.image_access(
                &image,
                &barrier.subresource_range,
                kind,
                barrier.dst_stages,
                false,
            );
        }

        for barrier in &dependency_info.buffer_memory_barriers {
            let buffer = resources.buffer(barrier.buffer)?;
            let (kind, _) = self.classify_barrier(barrier.queue_family_ownership_transfer);

            self.state
                .buffer_access(&buffer, kind, barrier.dst_stages, false);
        }

        match error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    /// Clears a color image.
    pub fn clear_color_image(
        &mut self,
        sink: &dyn DiagnosticSink,
        clear_info: &ClearColorImageInfo,
    ) -> Result<&mut Self, Error> {
        self.validate(sink, Operation::ClearColorImage(clear_info))?;

        let image = self.device.resources().image(clear_info.image)?;

        for range in regions_or_whole(&image, &clear_info.regions) {
            self.state
                .use_layout(&image, &range, clear_info.image_layout);
            self.state.image_access(
                &image,
                &range,
                AccessKind::Use,
                PipelineStages::ALL_TRANSFER,
                true,
            );
        }

        Ok(self)
    }

    /// Copies data from a buffer to an image.
    pub fn copy_buffer_to_image(
        &mut self,
        sink: &dyn DiagnosticSink,
        copy_info: &CopyBufferToImageInfo,
    ) -> Result<&mut Self, Error> {
        self.validate(sink, Operation::CopyBufferToImage(copy_info))?;

        let resources = self.device.resources();
        let src_buffer = resources.buffer(copy_info.src_buffer)?;
        let dst_image = resources.image(copy_info.dst_image)?;

        self.state.buffer_access(
            &src_buffer,
            AccessKind::Use,
            PipelineStages::ALL_TRANSFER,
            false,
        );

        for range in regions_or_whole(&dst_image, &copy_info.regions) {
            self.state
                .use_layout(&dst_image, &range, copy_info.dst_image_layout);
            self.state.image_access(
                &dst_image,
                &range,
                AccessKind::Use,
                PipelineStages::ALL_TRANSFER,
                true,
            );
        }

        Ok(self)
    }

    /// Fills a buffer with a repeated 32-bit value.
    pub fn fill_buffer(
        &mut self,
        sink: &dyn DiagnosticSink,
        dst_buffer: Id<Buffer>,
        data: u32,
    ) -> Result<&mut Self, Error> {
        self.validate(sink, Operation::FillBuffer { dst_buffer, data })?;

        let dst_buffer = self.device.resources().buffer(dst_buffer)?;
        self.state.buffer_access(
            &dst_buffer,
            AccessKind::Use,
            PipelineStages::ALL_TRANSFER,
            true,
        );

        Ok(self)
    }

    /// Begins a render pass instance.
    ///
    /// Every attachment is transitioned from its initial layout to the layout of its first use
    /// in a subpass.
    pub fn begin_render_pass(
        &mut self,
        sink: &dyn DiagnosticSink,
        begin_info: &RenderPassBeginInfo,
    ) -> Result<&mut Self, Error> {
        self.validate(sink, Operation::BeginRenderPass(begin_info))?;

        let resources = self.device.resources();
        let render_pass = resources.render_pass(begin_info.render_pass)?;
        let framebuffer = resources.framebuffer(begin_info.framebuffer)?;
        let views = match framebuffer.attachments() {
            FramebufferAttachments::Views(views) => views.as_slice(),
            FramebufferAttachments::Imageless(_) => begin_info.attachments.as_slice(),
        };
        let attachments = views
            .iter()
            .map(|&view| resources.image_view(view))
            .collect::<Result<SmallVec<[Arc<ImageView>; 4]>, _>>()?;

        self.state.reference(render_pass.id().erase());
        self.state.reference(framebuffer.id().erase());

        for (attachment_index, (view, description)) in
            attachments.iter().zip(render_pass.attachments()).enumerate()
        {
            let layout = render_pass
                .first_layout(attachment_index as u32)
                .unwrap_or(description.final_layout);

            self.state.reference(view.id().erase());
            self.state.transition(
                view.image(),
                view.subresource_range(),
                description.initial_layout,
                layout,
            );
            self.state.image_access(
                view.image(),
                view.subresource_range(),
                AccessKind::Use,
                PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                true,
            );
        }

        trace!("{:?}: begin {:?}", self.id(), render_pass.id());
        self.state.set_render_pass(Some(RenderPassInstance {
            render_pass,
            framebuffer,
            attachments,
        }));

        Ok(self)
    }

    /// Ends the active render pass instance, transitioning every attachment to its final layout.
    pub fn end_render_pass(&mut self, sink: &dyn DiagnosticSink) -> Result<&mut Self, Error> {
        self.validate(sink, Operation::EndRenderPass)?;

        if let Some(instance) = self.state.take_render_pass() {
            for (view, description) in instance
                .attachments
                .iter()
                .zip(instance.render_pass.attachments())
            {
                self.state.transition(
                    view.image(),
                    view.subresource_range(),
                    ImageLayout::Undefined,
                    description.final_layout,
                );
            }

            trace!("{:?}: end {:?}", self.id(), instance.render_pass.id());
        }

        Ok(self)
    }

    /// Ends recording, and returns the ID of the command buffer, which can now be submitted.
    pub fn end(self, sink: &dyn DiagnosticSink) -> Result<Id<CommandBuffer>, Error> {
        self.validate(sink, Operation::EndCommandBuffer)?;

        let RecordingCommandBuffer {
            device: _,
            command_buffer,
            state,
        } = self;
        command_buffer.finish(state.finish());

        Ok(command_buffer.id())
    }
}

/// Checks that no render pass instance is active.
fn check_outside_render_pass(ctx: &RuleContext<'_>, command: &str) -> RuleResult {
    if let Some(instance) = ctx.recording().and_then(RecordingState::render_pass) {
        return Err(Violation::new(format!(
            "`{command}` is recorded inside a render pass instance",
        ))
        .object(instance.render_pass().id())
        .into());
    }

    Ok(())
}

/// Checks that `layout` is one of the layouts allowed for the destination of a transfer.
fn check_transfer_dst_layout(image: Id<Image>, field: &str, layout: ImageLayout) -> RuleResult {
    if !matches!(
        layout,
        ImageLayout::TransferDstOptimal | ImageLayout::General
    ) {
        return Err(Violation::new(format!(
            "`{field}` is `{layout:?}`, which is not `ImageLayout::TransferDstOptimal` or \
            `ImageLayout::General`",
        ))
        .object(image)
        .into());
    }

    Ok(())
}

/// Checks that the subresources in `regions` are in `layout` at this point of the command
/// buffer, where their layout is known.
fn check_local_layout(
    ctx: &RuleContext<'_>,
    image: Id<Image>,
    field: &str,
    layout: ImageLayout,
    regions: &[ImageSubresourceRange],
) -> RuleResult {
    let Some(recording) = ctx.recording() else {
        return Ok(());
    };
    let Ok(image) = ctx.resources().get(image) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for range in regions_or_whole(&image, regions) {
        if let Some(current) = recording.layout_mismatch(&image, &range, layout) {
            violations.push(
                Violation::new(format!(
                    "`{field}` is `{layout:?}`, but the subresources are in layout \
                    `{current:?}` at this point of the command buffer",
                ))
                .object(image.id()),
            );
        }
    }

    violations.into_result()
}

fn clear_info<'a>(ctx: &'a RuleContext<'_>) -> Option<&'a ClearColorImageInfo> {
    match ctx.operation() {
        Operation::ClearColorImage(clear_info) => Some(clear_info),
        _ => None,
    }
}

pub(crate) fn clear_usage(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(clear_info) = clear_info(ctx) else {
        return Ok(());
    };
    let Ok(image) = ctx.resources().get(clear_info.image) else {
        return Ok(());
    };

    if !image.usage().intersects(ImageUsage::TRANSFER_DST) {
        return Err(Violation::new(format!(
            "the image has usage {:?}, which does not contain `ImageUsage::TRANSFER_DST`",
            image.usage(),
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn clear_bound(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(clear_info) = clear_info(ctx) else {
        return Ok(());
    };
    let Ok(image) = ctx.resources().get(clear_info.image) else {
        return Ok(());
    };

    if !image.is_bound() {
        return Err(Violation::new("no memory is bound to the image")
            .object(image.id())
            .into());
    }

    Ok(())
}

pub(crate) fn clear_layout_mismatch(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(clear_info) = clear_info(ctx) else {
        return Ok(());
    };

    check_local_layout(
        ctx,
        clear_info.image,
        "image_layout",
        clear_info.image_layout,
        &clear_info.regions,
    )
}

pub(crate) fn clear_layout(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(clear_info) = clear_info(ctx) else {
        return Ok(());
    };

    check_transfer_dst_layout(clear_info.image, "image_layout", clear_info.image_layout)
}

pub(crate) fn clear_in_render_pass(ctx: &RuleContext<'_>) -> RuleResult {
    match ctx.operation() {
        Operation::ClearColorImage(_) => check_outside_render_pass(ctx, "clear_color_image"),
        _ => Ok(()),
    }
}

fn copy_info<'a>(ctx: &'a RuleContext<'_>) -> Option<&'a CopyBufferToImageInfo> {
    match ctx.operation() {
        Operation::CopyBufferToImage(copy_info) => Some(copy_info),
        _ => None,
    }
}

pub(crate) fn copy_dst_usage(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(copy_info) = copy_info(ctx) else {
        return Ok(());
    };
    let Ok(image) = ctx.resources().get(copy_info.dst_image) else {
        return Ok(());
    };

    if !image.usage().intersects(ImageUsage::TRANSFER_DST) {
        return Err(Violation::new(format!(
            "`dst_image` has usage {:?}, which does not contain `ImageUsage::TRANSFER_DST`",
            image.usage(),
        ))
        .object(image.id())
        .into());
    }

    Ok(())
}

pub(crate) fn copy_src_usage(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(copy_info) = copy_info(ctx) else {
        return Ok(());
    };
    let Ok(buffer) = ctx.resources().get(copy_info.src_buffer) else {
        return Ok(());
    };

    if !buffer.usage().intersects(BufferUsage::TRANSFER_SRC) {
        return Err(Violation::new(format!(
            "`src_buffer` has usage {:?}, which does not contain `BufferUsage::TRANSFER_SRC`",
            buffer.usage(),
        ))
        .object(buffer.id())
        .into());
    }

    Ok(())
}

pub(crate) fn copy_layout_mismatch(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(copy_info) = copy_info(ctx) else {
        return Ok(());
    };

    check_local_layout(
        ctx,
        copy_info.dst_image,
        "dst_image_layout",
        copy_info.dst_image_layout,
        &copy_info.regions,
    )
}

pub(crate) fn copy_layout(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(copy_info) = copy_info(ctx) else {
        return Ok(());
    };

    check_transfer_dst_layout(
        copy_info.dst_image,
        "dst_image_layout",
        copy_info.dst_image_layout,
    )
}

pub(crate) fn copy_in_render_pass(ctx: &RuleContext<'_>) -> RuleResult {
    match ctx.operation() {
        Operation::CopyBufferToImage(_) => check_outside_render_pass(ctx, "copy_buffer_to_image"),
        _ => Ok(()),
    }
}

fn fill_buffer(ctx: &RuleContext<'_>) -> Option<Arc<Buffer>> {
    match ctx.operation() {
        Operation::FillBuffer { dst_buffer, .. } => ctx.resources().get(*dst_buffer).ok(),
        _ => None,
    }
}

pub(crate) fn fill_usage(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(buffer) = fill_buffer(ctx) else {
        return Ok(());
    };

    if !buffer.usage().intersects(BufferUsage::TRANSFER_DST) {
        return Err(Violation::new(format!(
            "`dst_buffer` has usage {:?}, which does not contain `BufferUsage::TRANSFER_DST`",
            buffer.usage(),
        ))
        .object(buffer.id())
        .into());
    }

    Ok(())
}

pub(crate) fn fill_bound(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(buffer) = fill_buffer(ctx) else {
        return Ok(());
    };

    if !buffer.is_bound() {
        return Err(Violation::new("no memory is bound to `dst_buffer`")
            .object(buffer.id())
            .into());
    }

    Ok(())
}

pub(crate) fn fill_in_render_pass(ctx: &RuleContext<'_>) -> RuleResult {
    match ctx.operation() {
        Operation::FillBuffer { .. } => check_outside_render_pass(ctx, "fill_buffer"),
        _ => Ok(()),
    }
}

pub(crate) fn begin_pending(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::BeginCommandBuffer {
        command_buffer: Some(command_buffer),
        ..
    } = ctx.operation()
    else {
        return Ok(());
    };
    let Ok(command_buffer) = ctx.resources().get(*command_buffer) else {
        return Ok(());
    };

    if command_buffer.status() == CommandBufferStatus::Pending {
        return Err(Violation::new("the command buffer is pending execution")
            .object(command_buffer.id())
            .into());
    }

    Ok(())
}

pub(crate) fn end_in_render_pass(ctx: &RuleContext<'_>) -> RuleResult {
    match ctx.operation() {
        Operation::EndCommandBuffer => check_outside_render_pass(ctx, "end"),
        _ => Ok(()),
    }
}

pub(crate) fn submit_not_executable(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(submission) = ctx.submission() else {
        return Ok(());
    };
    let command_buffer = submission.command_buffer();

    match command_buffer.status() {
        CommandBufferStatus::Executable | CommandBufferStatus::Pending => Ok(()),
        status => Err(Violation::new(format!(
            "the command buffer is in the {status:?} state",
        ))
        .object(command_buffer.id())
        .into()),
    }
}

pub(crate) fn submit_destroyed_reference(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(submission) = ctx.submission() else {
        return Ok(());
    };
    let command_buffer = submission.command_buffer();
    let Some(log) = command_buffer.log() else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for &id in log.references() {
        if ctx.resources().is_destroyed(id) {
            violations.push(
                Violation::new(format!(
                    "the command buffer references {id:?}, which has been destroyed",
                ))
                .object(command_buffer.id())
                .object(id),
            );
        }
    }

    violations.into_result()
}

pub(crate) fn submit_pending(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(submission) = ctx.submission() else {
        return Ok(());
    };
    let command_buffer = submission.command_buffer();

    if command_buffer.status() == CommandBufferStatus::Pending
        && command_buffer.usage() != CommandBufferUsage::SimultaneousUse
    {
        return Err(Violation::new(
            "the command buffer is already pending execution, and was not recorded with \
            `CommandBufferUsage::SimultaneousUse`",
        )
        .object(command_buffer.id())
        .into());
    }

    Ok(())
}

pub(crate) fn submit_queue_family(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(submission) = ctx.submission() else {
        return Ok(());
    };
    let command_buffer = submission.command_buffer();
    let queue = submission.queue();

    if command_buffer.queue_family_index() != queue.family_index() {
        return Err(Violation::new(format!(
            "the command buffer was allocated for queue family {}, but is submitted to a queue \
            of family {}",
            command_buffer.queue_family_index(),
            queue.family_index(),
        ))
        .object(command_buffer.id())
        .into());
    }

    Ok(())
}

/// Returns the queue that the operation records for or submits to.
fn operation_queue(ctx: &RuleContext<'_>) -> Option<Queue> {
    match *ctx.operation() {
        Operation::BeginCommandBuffer { queue, .. } | Operation::Submit { queue, .. } => Some(queue),
        _ => None,
    }
}

pub(crate) fn queue_family_index(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(queue) = operation_queue(ctx) else {
        return Ok(());
    };
    let family_count = ctx.environment().queue_family_properties().len();

    if queue.family_index() as usize >= family_count {
        return Err(Violation::new(format!(
            "queue family {} doesn't exist, the device has {family_count} queue families",
            queue.family_index(),
        ))
        .into());
    }

    Ok(())
}

pub(crate) fn queue_index(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(queue) = operation_queue(ctx) else {
        return Ok(());
    };
    let Some(family) = ctx
        .environment()
        .queue_family_properties()
        .get(queue.family_index() as usize)
    else {
        return Ok(());
    };

    if queue.index() >= family.queue_count {
        return Err(Violation::new(format!(
            "queue {} doesn't exist, queue family {} has {} queues",
            queue.index(),
            queue.family_index(),
            family.queue_count,
        ))
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::BufferCreateInfo,
        format::Format,
        sync::ImageMemoryBarrier,
        tests::{bound_buffer, bound_image, color_image_info},
        tracker::LocalLayout,
        ErrorKind,
    };

    #[test]
    fn clear_rules() {
        let (device, monitor) = test_device!();
        let unbound = device
            .create_image(
                &monitor,
                crate::image::ImageCreateInfo {
                    usage: ImageUsage::SAMPLED,
                    ..color_image_info(Format::R8G8B8A8_UNORM, [16, 16, 1])
                },
            )
            .unwrap();

        let mut builder = device.begin_command_buffer(&monitor, device.queue(0, 0)).unwrap();

        monitor.expect("VUID-vkCmdClearColorImage-image-00002");
        monitor.expect("VUID-vkCmdClearColorImage-image-00003");
        monitor.expect("VUID-vkCmdClearColorImage-imageLayout-01394");
        assert!(builder
            .clear_color_image(
                &monitor,
                &ClearColorImageInfo {
                    image_layout: ImageLayout::ShaderReadOnlyOptimal,
                    ..ClearColorImageInfo::image(unbound)
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
        assert!(builder.state().references().is_empty());
    }

    #[test]
    fn clear_in_wrong_local_layout() {
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
                        new_layout: ImageLayout::General,
                        ..ImageMemoryBarrier::image(image)
                    }]
                    .into_iter()
                    .collect(),
                    ..Default::default()
                },
            )
            .unwrap();

        monitor.expect("VUID-vkCmdClearColorImage-imageLayout-00004");
        let err = builder
            .clear_color_image(&monitor, &ClearColorImageInfo::image(image))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayoutMismatch);
        monitor.verify_found().unwrap();

        assert_eq!(
            builder.state().local_layout(image, 0),
            Some(LocalLayout {
                expected: None,
                current: ImageLayout::General,
            }),
        );
    }

    #[test]
    fn copy_and_fill() {
        let (device, monitor) = test_device!();
        let image = bound_image(
            &device,
            &monitor,
            color_image_info(Format::R8G8B8A8_UNORM, [16, 16, 1]),
        );
        let uniform = bound_buffer(
            &device,
            &monitor,
            BufferCreateInfo {
                size: 1024,
                usage: BufferUsage::UNIFORM_BUFFER,
                ..Default::default()
            },
        );
        let unbound = device
            .create_buffer(
                &monitor,
                BufferCreateInfo {
                    size: 1024,
                    usage: BufferUsage::TRANSFER_DST,
                    ..Default::default()
                },
            )
            .unwrap();

        let mut builder = device.begin_command_buffer(&monitor, device.queue(0, 0)).unwrap();

        monitor.expect("VUID-vkCmdCopyBufferToImage-srcBuffer-00174");
        monitor.expect("VUID-vkCmdCopyBufferToImage-dstImageLayout-01396");
        assert!(builder
            .copy_buffer_to_image(
                &monitor,
                &CopyBufferToImageInfo {
                    dst_image_layout: ImageLayout::ColorAttachmentOptimal,
                    ..CopyBufferToImageInfo::buffer_image(uniform, image)
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        monitor.expect("VUID-vkCmdFillBuffer-dstBuffer-00029");
        assert!(builder.fill_buffer(&monitor, uniform, 0).is_err());
        monitor.verify_found().unwrap();

        monitor.expect("VUID-vkCmdFillBuffer-dstBuffer-00031");
        assert!(builder.fill_buffer(&monitor, unbound, 0).is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn submission_lifecycle() {
        let (device, monitor) = test_device!();
        let queue = device.queue(0, 0);
        let buffer = bound_buffer(
            &device,
            &monitor,
            BufferCreateInfo {
                size: 256,
                usage: BufferUsage::TRANSFER_DST,
                ..Default::default()
            },
        );

        let mut builder = device
            .begin_command_buffer_with(
                &monitor,
                queue,
                CommandBufferBeginInfo {
                    usage: CommandBufferUsage::OneTimeSubmit,
                    ..Default::default()
                },
            )
            .unwrap();
        builder.fill_buffer(&monitor, buffer, 7).unwrap();
        let command_buffer = builder.end(&monitor).unwrap();
        let record = device.resources().get(command_buffer).unwrap();
        assert_eq!(record.status(), CommandBufferStatus::Executable);

        monitor.expect("VUID-vkQueueSubmit-pCommandBuffers-00074");
        assert!(device
            .queue_submit(&monitor, device.queue(1, 0), &[command_buffer])
            .is_err());
        monitor.verify_found().unwrap();
        assert_eq!(record.status(), CommandBufferStatus::Executable);

        monitor.expect_success();
        device.queue_submit(&monitor, queue, &[command_buffer]).unwrap();
        monitor.verify_found().unwrap();
        assert_eq!(record.status(), CommandBufferStatus::Pending);

        monitor.expect("VUID-vkQueueSubmit-pCommandBuffers-00071");
        assert!(device.queue_submit(&monitor, queue, &[command_buffer]).is_err());
        monitor.verify_found().unwrap();

        monitor.expect("VUID-vkBeginCommandBuffer-commandBuffer-00049");
        assert!(device
            .begin_command_buffer_with(
                &monitor,
                queue,
                CommandBufferBeginInfo {
                    command_buffer: Some(command_buffer),
                    ..Default::default()
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        device.queue_wait_idle(queue);
        assert_eq!(record.status(), CommandBufferStatus::Invalid);

        monitor.expect("VUID-vkQueueSubmit-pCommandBuffers-00070");
        assert!(device.queue_submit(&monitor, queue, &[command_buffer]).is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn queue_out_of_range() {
        let (device, monitor) = test_device!();

        monitor.expect("VUID-VkDeviceQueueCreateInfo-queueFamilyIndex-00381");
        assert!(device
            .begin_command_buffer(&monitor, device.queue(3, 0))
            .is_err());
        monitor.verify_found().unwrap();

        // The second family has two queues.
        monitor.expect("VUID-VkDeviceQueueCreateInfo-queueCount-00382");
        assert!(device
            .begin_command_buffer(&monitor, device.queue(1, 2))
            .is_err());
        monitor.verify_found().unwrap();

        let command_buffer = device
            .begin_command_buffer(&monitor, device.queue(1, 1))
            .unwrap()
            .end(&monitor)
            .unwrap();
        let record = device.resources().get(command_buffer).unwrap();

        monitor.expect("VUID-VkDeviceQueueCreateInfo-queueCount-00382");
        assert!(device
            .queue_submit(&monitor, device.queue(1, 5), &[command_buffer])
            .is_err());
        monitor.verify_found().unwrap();
        assert_eq!(record.status(), CommandBufferStatus::Executable);

        monitor.expect_success();
        device
            .queue_submit(&monitor, device.queue(1, 1), &[command_buffer])
            .unwrap();
        monitor.verify_found().unwrap();
        assert_eq!(record.status(), CommandBufferStatus::Pending);
    }

    #[test]
    fn destroyed_reference() {
        let (device, monitor) = test_device!();
        let queue = device.queue(0, 0);
        let buffer = bound_buffer(
            &device,
            &monitor,
            BufferCreateInfo {
                size: 256,
                usage: BufferUsage::TRANSFER_DST,
                ..Default::default()
            },
        );

        let mut builder = device.begin_command_buffer(&monitor, queue).unwrap();
        builder.fill_buffer(&monitor, buffer, 0).unwrap();
        let command_buffer = builder.end(&monitor).unwrap();

        monitor.expect_success();
        device.destroy_buffer(&monitor, buffer).unwrap();
        monitor.verify_found().unwrap();

        monitor.expect("VUID-vkQueueSubmit-pCommandBuffers-00070");
        let err = device
            .queue_submit(&monitor, queue, &[command_buffer])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UseAfterFree);
        monitor.verify_found().unwrap();
        assert_eq!(
            device.resources().get(command_buffer).unwrap().status(),
            CommandBufferStatus::Executable,
        );
    }

    #[test]
    fn end_inside_render_pass() {
        let (device, monitor) = test_device!();
        let queue = device.queue(0, 0);
        let render_pass = device
            .create_render_pass(
                &monitor,
                crate::render_pass::RenderPassCreateInfo {
                    attachments: vec![crate::render_pass::AttachmentDescription {
                        format: Format::R8G8B8A8_UNORM,
                        final_layout: ImageLayout::ColorAttachmentOptimal,
                        ..Default::default()
                    }],
                    subpasses: vec![crate::render_pass::SubpassDescription {
                        color_attachments: vec![crate::render_pass::AttachmentReference {
                            attachment: 0,
                            layout: ImageLayout::ColorAttachmentOptimal,
                        }],
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            )
            .unwrap();
        let image = bound_image(
            &device,
            &monitor,
            crate::image::ImageCreateInfo {
                usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_DST,
                ..color_image_info(Format::R8G8B8A8_UNORM, [16, 16, 1])
            },
        );
        let view = device
            .create_image_view(&monitor, crate::image::ImageViewCreateInfo::image(image))
            .unwrap();
        let framebuffer = device
            .create_framebuffer(
                &monitor,
                crate::render_pass::FramebufferCreateInfo {
                    attachments: FramebufferAttachments::Views(vec![view]),
                    extent: [16, 16],
                    ..crate::render_pass::FramebufferCreateInfo::render_pass(render_pass)
                },
            )
            .unwrap();

        let mut builder = device.begin_command_buffer(&monitor, queue).unwrap();
        builder
            .begin_render_pass(
                &monitor,
                &RenderPassBeginInfo::framebuffer(render_pass, framebuffer),
            )
            .unwrap();

        // The attachment is in its subpass layout, not the layout that the clear names.
        monitor.expect("VUID-vkCmdClearColorImage-renderpass");
        monitor.expect("VUID-vkCmdClearColorImage-imageLayout-00004");
        assert!(builder
            .clear_color_image(&monitor, &ClearColorImageInfo::image(image))
            .is_err());
        monitor.verify_found().unwrap();

        monitor.expect("VUID-vkEndCommandBuffer-commandBuffer-00060");
        assert!(builder.end(&monitor).is_err());
        monitor.verify_found().unwrap();
    }
}
