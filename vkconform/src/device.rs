//! The device, through which every object is created and every operation is performed.
//!
//! Each operation on a [`Device`] goes through the same three steps:
//!
//! 1. The rules of the device's [`RuleEngine`] that apply to the operation are evaluated against
//!    the current state, and every diagnostic they produce is reported to the
//!    [`DiagnosticSink`] passed to the operation.
//! 2. If any of the diagnostics has [`Severity::Error`], the operation is rejected: it returns
//!    the first of them as an [`Error`], and the state is left unchanged.
//! 3. Otherwise the effect of the operation is recorded.
//!
//! Submissions are the exception to the second step. The state of the resources a command buffer
//! uses always advances to the state the command buffer leaves them in, even when the submission
//! was diagnosed, so that later submissions are checked against what the device would actually
//! have done.

use crate::{
    binding::{self, Bindable, SubresourceLayout},
    buffer::{Buffer, BufferCreateInfo},
    command_buffer::{CommandBuffer, CommandBufferBeginInfo, RecordingCommandBuffer},
    environment::{Environment, HardwareBuffer, HardwareBufferProperties},
    image::{Image, ImageCreateInfo, ImageMemory, ImageSubresource, ImageView, ImageViewCreateInfo},
    memory::{
        DedicatedAllocation, DeviceMemory, ExternalMemoryFd, ExternalMemoryHandleTypes,
        MemoryAllocateInfo, MemoryBinding, MemoryImport, MemoryRequirements,
    },
    monitor::DiagnosticSink,
    render_pass::{Framebuffer, FramebufferCreateInfo, RenderPass, RenderPassCreateInfo},
    resource::{RegistryChange, Resources},
    rules::{Operation, RuleContext, RuleEngine},
    swapchain::{PresentInfo, Swapchain, SwapchainCreateInfo},
    tracker::{CommandBufferLog, SubmissionContext},
    Error, ErrorKind, Id, NonExhaustive, Object, Severity,
};
use foldhash::HashMap;
use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{fmt, sync::Arc};

/// Parameters to create a new [`Device`].
#[derive(Clone, Debug)]
pub struct DeviceCreateInfo {
    /// The rules that the device validates operations against.
    ///
    /// The default value is `None`, which uses [`RuleEngine::standard`].
    pub rule_engine: Option<Arc<RuleEngine>>,

    pub _ne: NonExhaustive,
}

impl Default for DeviceCreateInfo {
    #[inline]
    fn default() -> Self {
        DeviceCreateInfo {
            rule_engine: None,
            _ne: NonExhaustive(()),
        }
    }
}

/// A queue of a device, identified by its queue family and its index within the family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Queue {
    family_index: u32,
    index: u32,
}

impl Queue {
    #[inline]
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// A batch of command buffers to submit to a queue.
#[derive(Clone, Debug)]
pub struct SubmitBatch {
    pub queue: Queue,

    /// The command buffers to submit, in order.
    ///
    /// The default value is empty.
    pub command_buffers: SmallVec<[Id<CommandBuffer>; 4]>,

    /// The indices of other batches of the same submission that must execute before this one.
    ///
    /// The default value is empty.
    pub wait_for: SmallVec<[usize; 2]>,

    pub _ne: NonExhaustive,
}

impl SubmitBatch {
    /// Returns a `SubmitBatch` for `queue` with the other fields set to their defaults.
    #[inline]
    pub fn new(queue: Queue) -> Self {
        SubmitBatch {
            queue,
            command_buffers: SmallVec::new(),
            wait_for: SmallVec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

/// Orders the batches so that every batch comes after the batches it waits for. Among the batches
/// that are ready, the one with the lowest index comes first. Returns `None` if the waits form a
/// cycle.
///
/// Indices in `wait_for` that are out of range are ignored.
pub(crate) fn submission_order(batches: &[SubmitBatch]) -> Option<Vec<usize>> {
    let mut waiting: Vec<usize> = batches
        .iter()
        .map(|batch| {
            batch
                .wait_for
                .iter()
                .filter(|&&dependency| dependency < batches.len())
                .count()
        })
        .collect();
    let mut done = vec![false; batches.len()];
    let mut order = Vec::with_capacity(batches.len());

    while order.len() < batches.len() {
        let next = (0..batches.len()).find(|&index| !done[index] && waiting[index] == 0)?;
        done[next] = true;
        order.push(next);

        for (index, batch) in batches.iter().enumerate() {
            waiting[index] -= batch
                .wait_for
                .iter()
                .filter(|&&dependency| dependency == next)
                .count();
        }
    }

    Some(order)
}

/// The outcome of evaluating the rules for an operation.
pub(crate) struct Validation {
    /// The first error-severity diagnostic.
    pub(crate) error: Option<Error>,

    /// Whether an error other than a layout mismatch was found.
    pub(crate) structural: bool,
}

impl Validation {
    #[inline]
    pub(crate) fn into_result(self) -> Result<(), Error> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A command buffer that was submitted and hasn't been waited on yet.
struct PendingSubmission {
    command_buffer: Arc<CommandBuffer>,
    pinned: Vec<Id>,
}

/// The validation state of a device.
pub struct Device {
    environment: Arc<Environment>,
    resources: Resources,
    rule_engine: Arc<RuleEngine>,
    pending: Mutex<HashMap<Queue, Vec<PendingSubmission>>>,

    /// Held from the replay of a submission until its result is written to the tracked state, so
    /// that every replay starts from the state the previous submission left.
    submission: Mutex<()>,
}

impl Device {
    /// Creates a new `Device` in the given environment.
    ///
    /// Returns an error if no rule engine was given and the standard rule catalog can't be
    /// loaded.
    pub fn new(
        environment: Arc<Environment>,
        create_info: DeviceCreateInfo,
    ) -> Result<Arc<Device>, Error> {
        let DeviceCreateInfo {
            rule_engine,
            _ne: _,
        } = create_info;

        let rule_engine = match rule_engine {
            Some(rule_engine) => rule_engine,
            None => RuleEngine::standard().map_err(|err| {
                error!("failed to load the standard rule catalog: {err}");
                Error::new(ErrorKind::InvalidParams)
            })?,
        };

        debug!(
            "created a device with {} rules",
            rule_engine.rules().len(),
        );

        Ok(Arc::new(Device {
            environment,
            resources: Resources::new(),
            rule_engine,
            pending: Mutex::new(HashMap::default()),
            submission: Mutex::new(()),
        }))
    }

    #[inline]
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Returns the registry of the objects of the device.
    #[inline]
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    #[inline]
    pub fn rule_engine(&self) -> &Arc<RuleEngine> {
        &self.rule_engine
    }

    /// Returns the queue with the given index in the given queue family.
    ///
    /// The queue isn't checked here. Recording for or submitting to a queue that the environment
    /// doesn't have is diagnosed.
    #[inline]
    pub fn queue(&self, family_index: u32, index: u32) -> Queue {
        Queue {
            family_index,
            index,
        }
    }

    fn queue_exists(&self, queue: Queue) -> bool {
        self.environment
            .queue_family_properties()
            .get(queue.family_index() as usize)
            .is_some_and(|family| queue.index() < family.queue_count)
    }

    fn context<'a>(&'a self, operation: Operation<'a>) -> RuleContext<'a> {
        RuleContext::new(&self.resources, &self.environment, operation)
    }

    /// Evaluates the rules for `ctx` and reports every diagnostic to `sink`.
    pub(crate) fn evaluate(&self, sink: &dyn DiagnosticSink, ctx: &RuleContext<'_>) -> Validation {
        let mut validation = Validation {
            error: None,
            structural: false,
        };

        for diagnostic in self.rule_engine.evaluate(ctx) {
            debug!("{diagnostic}");

            if diagnostic.severity == Severity::Error {
                validation.structural |= diagnostic.kind != ErrorKind::LayoutMismatch;

                if validation.error.is_none() {
                    validation.error = Some(Error::from_diagnostic(&diagnostic));
                }
            }

            sink.emit(diagnostic);
        }

        if let Some(err) = &validation.error {
            warn!("{:?} was rejected: {err}", ctx.operation().checkpoint());
        }

        validation
    }

    /// Evaluates the rules for `ctx`, reports every diagnostic to `sink`, and returns the first
    /// error-severity diagnostic as an error.
    #[inline]
    pub(crate) fn validate(
        &self,
        sink: &dyn DiagnosticSink,
        ctx: &RuleContext<'_>,
    ) -> Result<(), Error> {
        self.evaluate(sink, ctx).into_result()
    }

    /// Creates a new image.
    pub fn create_image(
        &self,
        sink: &dyn DiagnosticSink,
        create_info: ImageCreateInfo,
    ) -> Result<Id<Image>, Error> {
        self.validate(sink, &self.context(Operation::CreateImage(&create_info)))?;

        let image = self.resources.insert(|id| Image::new(id, create_info));
        debug!("created {:?}", image.id());

        Ok(image.id())
    }

    /// Creates a new view of an image.
    pub fn create_image_view(
        &self,
        sink: &dyn DiagnosticSink,
        create_info: ImageViewCreateInfo,
    ) -> Result<Id<ImageView>, Error> {
        self.validate(sink, &self.context(Operation::CreateImageView(&create_info)))?;

        let image = self.resources.image(create_info.image)?;
        let image_view = self
            .resources
            .insert(|id| ImageView::new(id, image, create_info));
        debug!("created {:?}", image_view.id());

        Ok(image_view.id())
    }

    /// Creates a new buffer.
    pub fn create_buffer(
        &self,
        sink: &dyn DiagnosticSink,
        create_info: BufferCreateInfo,
    ) -> Result<Id<Buffer>, Error> {
        self.validate(sink, &self.context(Operation::CreateBuffer(&create_info)))?;

        let buffer = self.resources.insert(|id| Buffer::new(id, create_info));
        debug!("created {:?}", buffer.id());

        Ok(buffer.id())
    }

    /// Allocates device memory.
    ///
    /// An allocation that exports an Android hardware buffer for a dedicated image gets the size
    /// that the image requires. An allocation that imports a file descriptor consumes it.
    pub fn allocate_memory(
        &self,
        sink: &dyn DiagnosticSink,
        allocate_info: MemoryAllocateInfo,
    ) -> Result<Id<DeviceMemory>, Error> {
        self.validate(sink, &self.context(Operation::AllocateMemory(&allocate_info)))?;

        let mut allocation_size = allocate_info.allocation_size;

        if let Some(DedicatedAllocation::Image(image)) = allocate_info.dedicated_allocation {
            if allocation_size == 0
                && allocate_info
                    .export_handle_types
                    .intersects(ExternalMemoryHandleTypes::ANDROID_HARDWARE_BUFFER)
            {
                allocation_size = self
                    .resources
                    .image(image)?
                    .memory_requirements(&self.environment)
                    .size;
            }
        }

        if let Some(MemoryImport::Fd { fd, .. }) = &allocate_info.import {
            self.resources.take_exported_fd(*fd);
        }

        let memory = self
            .resources
            .insert(|id| DeviceMemory::new(id, allocate_info, allocation_size));
        debug!(
            "allocated {:?} of {allocation_size} bytes from memory type {}",
            memory.id(),
            memory.memory_type_index(),
        );

        Ok(memory.id())
    }

    /// Exports an allocation to a file descriptor, which can then be imported by another
    /// allocation.
    pub fn export_memory_fd(
        &self,
        sink: &dyn DiagnosticSink,
        memory: Id<DeviceMemory>,
        handle_type: ExternalMemoryHandleTypes,
    ) -> Result<ExternalMemoryFd, Error> {
        self.validate(
            sink,
            &self.context(Operation::ExportMemoryFd {
                memory,
                handle_type,
            }),
        )?;

        let memory = self.resources.memory(memory)?;
        let fd = self.resources.export_fd(&memory);
        debug!("exported {:?} to file descriptor {}", memory.id(), fd.fd);

        Ok(fd)
    }

    /// Returns the properties of an Android hardware buffer, and makes its external format known
    /// to the device.
    pub fn hardware_buffer_properties(
        &self,
        sink: &dyn DiagnosticSink,
        buffer: &HardwareBuffer,
    ) -> Result<HardwareBufferProperties, Error> {
        self.validate(
            sink,
            &self.context(Operation::GetHardwareBufferProperties(buffer)),
        )?;

        let properties = self.environment.hardware_buffer_properties(buffer);

        if let Some(external_format) = properties.external_format {
            self.resources.add_external_format(external_format.get());
        }

        Ok(properties)
    }

    /// Binds memory to an image.
    pub fn bind_image_memory(
        &self,
        sink: &dyn DiagnosticSink,
        image: Id<Image>,
        memory: Id<DeviceMemory>,
        offset: u64,
    ) -> Result<(), Error> {
        self.validate(
            sink,
            &self.context(Operation::BindImageMemory {
                image,
                memory,
                offset,
            }),
        )?;

        let image = self.resources.image(image)?;
        let allocation = self.resources.memory(memory)?;

        // The requirements of deferred images are whatever the import provides.
        let size = if image.has_deferred_requirements() {
            allocation.allocation_size().saturating_sub(offset)
        } else {
            image.memory_requirements(&self.environment).size
        };

        if !image.set_memory(ImageMemory::Normal(MemoryBinding {
            memory,
            offset,
            size,
        })) {
            return Err(Error::new(ErrorKind::InvalidParams));
        }

        self.resources
            .record(image.id().erase(), RegistryChange::Bound);
        debug!("bound {memory:?} at offset {offset} to {:?}", image.id());

        Ok(())
    }

    /// Binds memory to a buffer.
    pub fn bind_buffer_memory(
        &self,
        sink: &dyn DiagnosticSink,
        buffer: Id<Buffer>,
        memory: Id<DeviceMemory>,
        offset: u64,
    ) -> Result<(), Error> {
        self.validate(
            sink,
            &self.context(Operation::BindBufferMemory {
                buffer,
                memory,
                offset,
            }),
        )?;

        let buffer = self.resources.buffer(buffer)?;
        let size = buffer.memory_requirements(&self.environment).size;

        if !buffer.set_memory(MemoryBinding {
            memory,
            offset,
            size,
        }) {
            return Err(Error::new(ErrorKind::InvalidParams));
        }

        self.resources
            .record(buffer.id().erase(), RegistryChange::Bound);
        debug!("bound {memory:?} at offset {offset} to {:?}", buffer.id());

        Ok(())
    }

    fn query_image_memory_requirements(
        &self,
        sink: &dyn DiagnosticSink,
        image: Id<Image>,
        extended: bool,
    ) -> Result<MemoryRequirements, Error> {
        self.validate(
            sink,
            &self.context(Operation::GetImageMemoryRequirements { image, extended }),
        )?;

        let image = self.resources.image(image)?;
        let mut requirements = image.memory_requirements(&self.environment);

        if image.has_deferred_requirements() {
            if let Some(ImageMemory::Normal(binding)) = image.memory() {
                requirements.size = binding.size;
            }
        }

        Ok(requirements)
    }

    /// Returns the memory requirements of an image.
    #[inline]
    pub fn image_memory_requirements(
        &self,
        sink: &dyn DiagnosticSink,
        image: Id<Image>,
    ) -> Result<MemoryRequirements, Error> {
        self.query_image_memory_requirements(sink, image, false)
    }

    /// Returns the memory requirements of an image, through the extended query.
    #[inline]
    pub fn image_memory_requirements2(
        &self,
        sink: &dyn DiagnosticSink,
        image: Id<Image>,
    ) -> Result<MemoryRequirements, Error> {
        self.query_image_memory_requirements(sink, image, true)
    }

    /// Returns the memory requirements of a buffer.
    pub fn buffer_memory_requirements(
        &self,
        buffer: Id<Buffer>,
    ) -> Result<MemoryRequirements, Error> {
        Ok(self
            .resources
            .buffer(buffer)?
            .memory_requirements(&self.environment))
    }

    /// Returns the layout of a subresource of an image with linear tiling.
    pub fn image_subresource_layout(
        &self,
        sink: &dyn DiagnosticSink,
        image: Id<Image>,
        subresource: ImageSubresource,
    ) -> Result<SubresourceLayout, Error> {
        self.validate(
            sink,
            &self.context(Operation::GetImageSubresourceLayout { image, subresource }),
        )?;

        let image = self.resources.image(image)?;

        if subresource.mip_level >= image.mip_levels()
            || subresource.array_layer >= image.array_layers()
            || !image.aspects().intersects(subresource.aspect.into())
        {
            return Err(Error::new(ErrorKind::InvalidParams));
        }

        Ok(binding::subresource_layout(&image, subresource))
    }

    /// Creates a new render pass.
    pub fn create_render_pass(
        &self,
        sink: &dyn DiagnosticSink,
        create_info: RenderPassCreateInfo,
    ) -> Result<Id<RenderPass>, Error> {
        self.validate(sink, &self.context(Operation::CreateRenderPass(&create_info)))?;

        let render_pass = self
            .resources
            .insert(|id| RenderPass::new(id, create_info));
        debug!("created {:?}", render_pass.id());

        Ok(render_pass.id())
    }

    /// Creates a new framebuffer.
    pub fn create_framebuffer(
        &self,
        sink: &dyn DiagnosticSink,
        create_info: FramebufferCreateInfo,
    ) -> Result<Id<Framebuffer>, Error> {
        self.validate(sink, &self.context(Operation::CreateFramebuffer(&create_info)))?;

        let render_pass = self.resources.render_pass(create_info.render_pass)?;
        let framebuffer = self
            .resources
            .insert(|id| Framebuffer::new(id, render_pass, create_info));
        debug!("created {:?}", framebuffer.id());

        Ok(framebuffer.id())
    }

    /// Creates a new swapchain, along with its images.
    pub fn create_swapchain(
        &self,
        sink: &dyn DiagnosticSink,
        create_info: SwapchainCreateInfo,
    ) -> Result<Id<Swapchain>, Error> {
        self.validate(sink, &self.context(Operation::CreateSwapchain(&create_info)))?;

        let image_create_info = create_info.image_create_info();
        let swapchain = self.resources.insert(|id| {
            let images = (0..create_info.min_image_count)
                .map(|image_index| {
                    self.resources
                        .insert(|image_id| {
                            Image::new_swapchain_image(
                                image_id,
                                image_create_info.clone(),
                                id,
                                image_index,
                            )
                        })
                        .id()
                })
                .collect();

            Swapchain::new(id, &create_info, images)
        });
        debug!(
            "created {:?} with images {:?}",
            swapchain.id(),
            swapchain.images(),
        );

        Ok(swapchain.id())
    }

    fn destroy<O: Object>(&self, sink: &dyn DiagnosticSink, id: Id<O>) -> Result<Arc<O>, Error> {
        self.validate(sink, &self.context(Operation::Destroy(id.erase())))?;

        let object = self.resources.remove(id).ok_or(Error::not_found(id))?;
        debug!("destroyed {id:?}");

        Ok(object)
    }

    pub fn destroy_image(&self, sink: &dyn DiagnosticSink, image: Id<Image>) -> Result<(), Error> {
        self.destroy(sink, image).map(drop)
    }

    pub fn destroy_image_view(
        &self,
        sink: &dyn DiagnosticSink,
        image_view: Id<ImageView>,
    ) -> Result<(), Error> {
        self.destroy(sink, image_view).map(drop)
    }

    pub fn destroy_buffer(&self, sink: &dyn DiagnosticSink, buffer: Id<Buffer>) -> Result<(), Error> {
        self.destroy(sink, buffer).map(drop)
    }

    pub fn free_memory(
        &self,
        sink: &dyn DiagnosticSink,
        memory: Id<DeviceMemory>,
    ) -> Result<(), Error> {
        self.destroy(sink, memory).map(drop)
    }

    pub fn destroy_render_pass(
        &self,
        sink: &dyn DiagnosticSink,
        render_pass: Id<RenderPass>,
    ) -> Result<(), Error> {
        self.destroy(sink, render_pass).map(drop)
    }

    pub fn destroy_framebuffer(
        &self,
        sink: &dyn DiagnosticSink,
        framebuffer: Id<Framebuffer>,
    ) -> Result<(), Error> {
        self.destroy(sink, framebuffer).map(drop)
    }

    pub fn free_command_buffer(
        &self,
        sink: &dyn DiagnosticSink,
        command_buffer: Id<CommandBuffer>,
    ) -> Result<(), Error> {
        self.destroy(sink, command_buffer).map(drop)
    }

    /// Destroys a swapchain and its images.
    pub fn destroy_swapchain(
        &self,
        sink: &dyn DiagnosticSink,
        swapchain: Id<Swapchain>,
    ) -> Result<(), Error> {
        let swapchain = self.destroy(sink, swapchain)?;

        for &image in swapchain.images() {
            self.resources.remove(image);
        }

        Ok(())
    }

    /// Begins recording a new command buffer for `queue`, with the default begin info.
    #[inline]
    pub fn begin_command_buffer(
        &self,
        sink: &dyn DiagnosticSink,
        queue: Queue,
    ) -> Result<RecordingCommandBuffer<'_>, Error> {
        self.begin_command_buffer_with(sink, queue, CommandBufferBeginInfo::default())
    }

    /// Begins recording a command buffer for `queue`.
    ///
    /// If `begin_info.command_buffer` is `Some`, that command buffer is recorded again, which
    /// discards what it previously recorded. Otherwise a new command buffer is created.
    pub fn begin_command_buffer_with(
        &self,
        sink: &dyn DiagnosticSink,
        queue: Queue,
        begin_info: CommandBufferBeginInfo,
    ) -> Result<RecordingCommandBuffer<'_>, Error> {
        self.validate(
            sink,
            &self.context(Operation::BeginCommandBuffer {
                queue,
                command_buffer: begin_info.command_buffer,
            }),
        )?;

        let command_buffer = match begin_info.command_buffer {
            Some(command_buffer) => self.resources.command_buffer(command_buffer)?,
            None => self
                .resources
                .insert(|id| CommandBuffer::new(id, queue.family_index())),
        };
        command_buffer.begin(begin_info.usage);
        trace!("began recording {:?}", command_buffer.id());

        Ok(RecordingCommandBuffer::new(self, command_buffer))
    }

    /// Submits command buffers to a single queue.
    pub fn queue_submit(
        &self,
        sink: &dyn DiagnosticSink,
        queue: Queue,
        command_buffers: &[Id<CommandBuffer>],
    ) -> Result<(), Error> {
        self.submit(
            sink,
            &[SubmitBatch {
                command_buffers: command_buffers.iter().copied().collect(),
                ..SubmitBatch::new(queue)
            }],
        )
    }

    /// Submits batches of command buffers, possibly to several queues.
    ///
    /// The batches are processed in the order given by their `wait_for` hints, and the command
    /// buffers within a batch in the order they are listed. Each command buffer is validated
    /// against the state that the command buffers before it left the resources in.
    ///
    /// A command buffer that can't be executed at all is not submitted. Other command buffers are
    /// submitted even when diagnosed. The first error is returned once every command buffer has
    /// been processed.
    pub fn submit(&self, sink: &dyn DiagnosticSink, batches: &[SubmitBatch]) -> Result<(), Error> {
        self.validate(sink, &self.context(Operation::SubmitBatches(batches)))?;

        let order = submission_order(batches).ok_or(Error::new(ErrorKind::InvalidParams))?;
        let mut result = Ok(());

        for batch in order.into_iter().map(|index| &batches[index]) {
            for &command_buffer in &batch.command_buffers {
                let submitted = self.submit_command_buffer(sink, batch.queue, command_buffer);

                if result.is_ok() {
                    result = submitted;
                }
            }
        }

        result
    }

    fn submit_command_buffer(
        &self,
        sink: &dyn DiagnosticSink,
        queue: Queue,
        id: Id<CommandBuffer>,
    ) -> Result<(), Error> {
        let command_buffer = self.resources.command_buffer(id)?;
        let _submission_guard = self.submission.lock();
        let submission = SubmissionContext::new(queue, &command_buffer, &self.resources);
        let ctx = self
            .context(Operation::Submit {
                queue,
                command_buffer: id,
            })
            .with_submission(&submission);
        let result = self.validate(sink, &ctx);

        let log = match command_buffer.log() {
            Some(log)
                if command_buffer.is_submittable()
                    && self.queue_exists(queue)
                    && command_buffer.queue_family_index() == queue.family_index()
                    && log
                        .references()
                        .iter()
                        .all(|&reference| self.resources.contains(reference)) =>
            {
                log
            }
            _ => return result.and(Err(Error::new(ErrorKind::InvalidParams))),
        };

        submission.report().apply();
        command_buffer.submitted();

        let pinned = self.pinned_objects(&command_buffer, &log);
        self.resources.pin(pinned.iter().copied());
        self.resources.record(id.erase(), RegistryChange::Submitted);
        trace!("submitted {id:?} to {queue:?}");

        self.pending
            .lock()
            .entry(queue)
            .or_default()
            .push(PendingSubmission {
                command_buffer: command_buffer.clone(),
                pinned,
            });

        result
    }

    /// Returns the objects that must stay alive while the command buffer is pending: the command
    /// buffer, the objects it references, and the memory bound to the images and buffers among
    /// them.
    fn pinned_objects(&self, command_buffer: &CommandBuffer, log: &CommandBufferLog) -> Vec<Id> {
        let mut pinned = vec![command_buffer.id().erase()];

        for &id in log.references() {
            pinned.push(id);

            let memory = if let Some(image) = id.downcast::<Image>() {
                self.resources
                    .image(image)
                    .ok()
                    .and_then(|image| match image.memory() {
                        Some(ImageMemory::Normal(binding)) => Some(binding.memory),
                        _ => None,
                    })
            } else if let Some(buffer) = id.downcast::<Buffer>() {
                self.resources
                    .buffer(buffer)
                    .ok()
                    .and_then(|buffer| buffer.memory().map(|binding| binding.memory))
            } else {
                None
            };

            pinned.extend(memory.map(Id::erase));
        }

        pinned
    }

    fn retire(&self, submission: PendingSubmission) {
        let PendingSubmission {
            command_buffer,
            pinned,
        } = submission;

        self.resources.unpin(pinned);
        command_buffer.retire();
        self.resources
            .record(command_buffer.id().erase(), RegistryChange::Retired);
        trace!("retired {:?}", command_buffer.id());
    }

    /// Marks every command buffer submitted to `queue` as finished.
    pub fn queue_wait_idle(&self, queue: Queue) {
        let retired = self.pending.lock().remove(&queue).unwrap_or_default();

        for submission in retired {
            self.retire(submission);
        }
    }

    /// Marks every submitted command buffer as finished.
    pub fn wait_idle(&self) {
        let retired: Vec<_> = self
            .pending
            .lock()
            .drain()
            .flat_map(|(_, submissions)| submissions)
            .collect();

        for submission in retired {
            self.retire(submission);
        }
    }

    /// Acquires the next available image of a swapchain, and returns its index.
    pub fn acquire_next_image(
        &self,
        sink: &dyn DiagnosticSink,
        swapchain: Id<Swapchain>,
    ) -> Result<u32, Error> {
        self.validate(sink, &self.context(Operation::AcquireNextImage { swapchain }))?;

        let swapchain = self.resources.swapchain(swapchain)?;
        let image_index = swapchain
            .acquire()
            .ok_or(Error::new(ErrorKind::InvalidParams))?;
        trace!("acquired image {image_index} of {:?}", swapchain.id());

        Ok(image_index)
    }

    /// Presents swapchain images, which returns them to their swapchains.
    pub fn present(&self, sink: &dyn DiagnosticSink, present_info: &PresentInfo) -> Result<(), Error> {
        self.validate(sink, &self.context(Operation::Present(present_info)))?;

        for swapchain_info in &present_info.swapchain_infos {
            self.resources
                .swapchain(swapchain_info.swapchain)?
                .release(swapchain_info.image_index);
            trace!(
                "presented image {} of {:?}",
                swapchain_info.image_index,
                swapchain_info.swapchain,
            );
        }

        Ok(())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("environment", &self.environment)
            .field("resources", &self.resources)
            .field("rules", &self.rule_engine.rules().len())
            .finish_non_exhaustive()
    }
}
