//! The rule engine, which evaluates named predicates over the state of a device.
//!
//! A [`Rule`] couples a pure predicate with the VUID it reports, the class of the violation, and
//! the [`Checkpoint`] at which it is evaluated. Every operation on a [`Device`] builds a
//! [`RuleContext`] that describes the [`Operation`] about to be performed, and asks its
//! [`RuleEngine`] to evaluate every rule registered for the checkpoint of that operation. Each
//! violation becomes one [`Diagnostic`].
//!
//! Rules only ever see shared references to the state of the device. The effects of an operation
//! are recorded after its rules have been evaluated, and only if no rule rejected it.
//!
//! The standard set of rules is described by a RON catalog that is embedded into the crate. Each
//! entry of the catalog names one of the [built-in predicates], and gives the VUID, kind,
//! severity and checkpoint of the rule:
//!
//! ```ron
//! (
//!     rule: "buffer::size_nonzero",
//!     vuid: "VUID-VkBufferCreateInfo-size-00912",
//!     kind: InvalidParams,
//!     severity: Error,
//!     checkpoint: ResourceCreation,
//! )
//! ```
//!
//! Leaving out the checkpoint makes the rule apply at every checkpoint.
//!
//! [`Device`]: crate::device::Device
//! [built-in predicates]: RuleEngine::builtin_predicates

use crate::{
    buffer::{Buffer, BufferCreateInfo},
    command_buffer::{ClearColorImageInfo, CommandBuffer, CopyBufferToImageInfo},
    device::{Queue, SubmitBatch},
    environment::{Environment, HardwareBuffer},
    image::{Image, ImageCreateInfo, ImageSubresource, ImageView, ImageViewCreateInfo},
    memory::{DeviceMemory, ExternalMemoryHandleTypes, MemoryAllocateInfo},
    render_pass::{
        Framebuffer, FramebufferAttachments, FramebufferCreateInfo, RenderPass,
        RenderPassBeginInfo, RenderPassCreateInfo,
    },
    resource::Resources,
    swapchain::{PresentInfo, Swapchain, SwapchainCreateInfo},
    sync::DependencyInfo,
    tracker::{RecordingState, SubmissionContext},
    Diagnostic, DeviceSize, ErrorKind, Id, Object, Severity,
};
use foldhash::HashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::{
    error::Error as StdError,
    fmt,
    sync::{Arc, OnceLock},
};

/// The point in the life of an operation at which a rule is evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Checkpoint {
    /// Creating, allocating, binding, querying or destroying an object.
    ResourceCreation,

    /// Recording a command into a command buffer.
    CommandRecording,

    /// Submitting command buffers to a queue.
    Submission,

    /// Acquiring and presenting swapchain images.
    Presentation,
}

/// An operation that is about to be performed on a device.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum Operation<'a> {
    CreateImage(&'a ImageCreateInfo),
    CreateImageView(&'a ImageViewCreateInfo),
    CreateBuffer(&'a BufferCreateInfo),
    AllocateMemory(&'a MemoryAllocateInfo),
    ExportMemoryFd {
        memory: Id<DeviceMemory>,
        handle_type: ExternalMemoryHandleTypes,
    },
    GetHardwareBufferProperties(&'a HardwareBuffer),
    CreateRenderPass(&'a RenderPassCreateInfo),
    CreateFramebuffer(&'a FramebufferCreateInfo),
    CreateSwapchain(&'a SwapchainCreateInfo),
    Destroy(Id),
    BindImageMemory {
        image: Id<Image>,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
    },
    BindBufferMemory {
        buffer: Id<Buffer>,
        memory: Id<DeviceMemory>,
        offset: DeviceSize,
    },
    GetImageMemoryRequirements {
        image: Id<Image>,

        /// Whether the requirements are queried through the extensible entry point.
        extended: bool,
    },
    GetImageSubresourceLayout {
        image: Id<Image>,
        subresource: ImageSubresource,
    },
    BeginCommandBuffer {
        queue: Queue,

        /// The command buffer that is recorded again, if any.
        command_buffer: Option<Id<CommandBuffer>>,
    },
    EndCommandBuffer,
    PipelineBarrier(&'a DependencyInfo),
    BeginRenderPass(&'a RenderPassBeginInfo),
    EndRenderPass,
    ClearColorImage(&'a ClearColorImageInfo),
    CopyBufferToImage(&'a CopyBufferToImageInfo),
    FillBuffer {
        dst_buffer: Id<Buffer>,
        data: u32,
    },

    /// A whole submission, before any of its command buffers is submitted.
    SubmitBatches(&'a [SubmitBatch]),

    /// The submission of a single command buffer. The [`SubmissionContext`] of the rule context
    /// describes it.
    Submit {
        queue: Queue,
        command_buffer: Id<CommandBuffer>,
    },
    AcquireNextImage {
        swapchain: Id<Swapchain>,
    },
    Present(&'a PresentInfo),
}

impl Operation<'_> {
    /// Returns the checkpoint at which the rules for this operation are evaluated.
    pub fn checkpoint(&self) -> Checkpoint {
        match self {
            Self::CreateImage(_)
            | Self::CreateImageView(_)
            | Self::CreateBuffer(_)
            | Self::AllocateMemory(_)
            | Self::ExportMemoryFd { .. }
            | Self::GetHardwareBufferProperties(_)
            | Self::CreateRenderPass(_)
            | Self::CreateFramebuffer(_)
            | Self::CreateSwapchain(_)
            | Self::Destroy(_)
            | Self::BindImageMemory { .. }
            | Self::BindBufferMemory { .. }
            | Self::GetImageMemoryRequirements { .. }
            | Self::GetImageSubresourceLayout { .. } => Checkpoint::ResourceCreation,
            Self::BeginCommandBuffer { .. }
            | Self::EndCommandBuffer
            | Self::PipelineBarrier(_)
            | Self::BeginRenderPass(_)
            | Self::EndRenderPass
            | Self::ClearColorImage(_)
            | Self::CopyBufferToImage(_)
            | Self::FillBuffer { .. } => Checkpoint::CommandRecording,
            Self::SubmitBatches(_) | Self::Submit { .. } => Checkpoint::Submission,
            Self::AcquireNextImage { .. } | Self::Present(_) => Checkpoint::Presentation,
        }
    }

    /// Returns the objects that the operation names directly.
    ///
    /// Objects that are only reached through another object, such as the resources referenced by
    /// a submitted command buffer, are not included.
    pub fn referenced_objects(&self) -> SmallVec<[Id; 4]> {
        let mut ids = SmallVec::new();

        match *self {
            Self::CreateImage(_)
            | Self::CreateBuffer(_)
            | Self::GetHardwareBufferProperties(_)
            | Self::CreateRenderPass(_)
            | Self::CreateSwapchain(_)
            | Self::EndCommandBuffer
            | Self::EndRenderPass
            | Self::Submit { .. } => (),
            Self::CreateImageView(create_info) => ids.push(create_info.image.erase()),
            Self::AllocateMemory(allocate_info) => {
                ids.extend(allocate_info.dedicated_allocation.map(|dedicated| dedicated.id()));
            }
            Self::ExportMemoryFd { memory, .. } => ids.push(memory.erase()),
            Self::CreateFramebuffer(create_info) => {
                ids.push(create_info.render_pass.erase());

                if let FramebufferAttachments::Views(views) = &create_info.attachments {
                    ids.extend(views.iter().map(|view| view.erase()));
                }
            }
            Self::Destroy(id) => ids.push(id),
            Self::BindImageMemory { image, memory, .. } => {
                ids.extend([image.erase(), memory.erase()]);
            }
            Self::BindBufferMemory { buffer, memory, .. } => {
                ids.extend([buffer.erase(), memory.erase()]);
            }
            Self::GetImageMemoryRequirements { image, .. }
            | Self::GetImageSubresourceLayout { image, .. } => ids.push(image.erase()),
            Self::BeginCommandBuffer { command_buffer, .. } => {
                ids.extend(command_buffer.map(Id::erase));
            }
            Self::PipelineBarrier(dependency_info) => {
                ids.extend(
                    dependency_info
                        .image_memory_barriers
                        .iter()
                        .map(|barrier| barrier.image.erase()),
                );
                ids.extend(
                    dependency_info
                        .buffer_memory_barriers
                        .iter()
                        .map(|barrier| barrier.buffer.erase()),
                );
            }
            Self::BeginRenderPass(begin_info) => {
                ids.extend([begin_info.render_pass.erase(), begin_info.framebuffer.erase()]);
                ids.extend(begin_info.attachments.iter().map(|view| view.erase()));
            }
            Self::ClearColorImage(clear_info) => ids.push(clear_info.image.erase()),
            Self::CopyBufferToImage(copy_info) => {
                ids.extend([copy_info.src_buffer.erase(), copy_info.dst_image.erase()]);
            }
            Self::FillBuffer { dst_buffer, .. } => ids.push(dst_buffer.erase()),
            Self::SubmitBatches(batches) => {
                ids.extend(
                    batches
                        .iter()
                        .flat_map(|batch| &batch.command_buffers)
                        .map(|command_buffer| command_buffer.erase()),
                );
            }
            Self::AcquireNextImage { swapchain } => ids.push(swapchain.erase()),
            Self::Present(present_info) => {
                ids.extend(
                    present_info
                        .swapchain_infos
                        .iter()
                        .map(|swapchain_info| swapchain_info.swapchain.erase()),
                );
            }
        }

        ids
    }
}

/// Everything a rule can inspect.
#[derive(Clone, Copy)]
pub struct RuleContext<'a> {
    resources: &'a Resources,
    environment: &'a Environment,
    operation: Operation<'a>,
    recording: Option<&'a RecordingState>,
    submission: Option<&'a SubmissionContext<'a>>,
}

impl<'a> RuleContext<'a> {
    /// Creates a context for an operation outside of command recording and submission.
    #[inline]
    pub fn new(
        resources: &'a Resources,
        environment: &'a Environment,
        operation: Operation<'a>,
    ) -> Self {
        RuleContext {
            resources,
            environment,
            operation,
            recording: None,
            submission: None,
        }
    }

    /// Adds the state of the command buffer that the operation is recorded into.
    #[inline]
    pub fn with_recording(mut self, recording: &'a RecordingState) -> Self {
        self.recording = Some(recording);
        self
    }

    /// Adds the command buffer submission that the operation performs.
    #[inline]
    pub fn with_submission(mut self, submission: &'a SubmissionContext<'a>) -> Self {
        self.submission = Some(submission);
        self
    }

    #[inline]
    pub fn resources(&self) -> &'a Resources {
        self.resources
    }

    #[inline]
    pub fn environment(&self) -> &'a Environment {
        self.environment
    }

    #[inline]
    pub fn operation(&self) -> &Operation<'a> {
        &self.operation
    }

    /// Returns the state of the command buffer being recorded, if the operation is a command.
    #[inline]
    pub fn recording(&self) -> Option<&'a RecordingState> {
        self.recording
    }

    /// Returns the submission being performed, if the operation submits a command buffer.
    #[inline]
    pub fn submission(&self) -> Option<&'a SubmissionContext<'a>> {
        self.submission
    }
}

impl fmt::Debug for RuleContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("operation", &self.operation)
            .field("recording", &self.recording.is_some())
            .field("submission", &self.submission)
            .finish_non_exhaustive()
    }
}

/// A single failure of a rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    message: String,
    objects: SmallVec<[Id; 2]>,
}

impl Violation {
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Violation {
            message: message.into(),
            objects: SmallVec::new(),
        }
    }

    /// Adds an object that the violation concerns.
    #[inline]
    pub fn object<T>(mut self, id: Id<T>) -> Self {
        self.objects.push(id.erase());
        self
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn objects(&self) -> &[Id] {
        &self.objects
    }
}

/// The failures of one evaluation of a rule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Violations(SmallVec<[Violation; 1]>);

impl Violations {
    #[inline]
    pub fn new() -> Self {
        Violations(SmallVec::new())
    }

    #[inline]
    pub fn push(&mut self, violation: Violation) {
        self.0.push(violation);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }

    /// Returns `Ok` if no violation was pushed.
    #[inline]
    pub fn into_result(self) -> RuleResult {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<Violation> for Violations {
    #[inline]
    fn from(violation: Violation) -> Self {
        Violations(SmallVec::from_elem(violation, 1))
    }
}

impl Extend<Violation> for Violations {
    #[inline]
    fn extend<I: IntoIterator<Item = Violation>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Violations {
    type Item = Violation;
    type IntoIter = smallvec::IntoIter<[Violation; 1]>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// The result of evaluating a rule.
pub type RuleResult = Result<(), Violations>;

/// A pure predicate over the state of a device.
pub type Predicate = fn(&RuleContext<'_>) -> RuleResult;

/// A named rule.
#[derive(Clone)]
pub struct Rule {
    /// The name of the rule, which is unique within a [`RuleEngine`].
    pub name: Arc<str>,

    /// The VUID that diagnostics of this rule carry.
    pub vuid: Arc<str>,

    pub kind: ErrorKind,

    pub severity: Severity,

    /// The checkpoint at which the rule is evaluated. `None` evaluates it at every checkpoint.
    pub checkpoint: Option<Checkpoint>,

    pub predicate: Predicate,
}

impl Rule {
    /// Returns whether the rule is evaluated at `checkpoint`.
    #[inline]
    pub fn applies_to(&self, checkpoint: Checkpoint) -> bool {
        self.checkpoint.map_or(true, |own| own == checkpoint)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("vuid", &self.vuid)
            .field("kind", &self.kind)
            .field("severity", &self.severity)
            .field("checkpoint", &self.checkpoint)
            .finish_non_exhaustive()
    }
}

/// Error returned by [`RuleEngine::register`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterError {
    /// A rule with the same name is already registered.
    DuplicateRule(Arc<str>),
}

impl StdError for RegisterError {}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateRule(name) => write!(f, "a rule named `{name}` is already registered"),
        }
    }
}

/// Error returned when a rule catalog cannot be loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogError {
    /// The catalog is not valid RON, or doesn't have the expected structure.
    Parse(ron::error::SpannedError),

    /// An entry names a predicate that doesn't exist.
    UnknownRule(String),

    /// An entry could not be registered.
    Register(RegisterError),
}

impl StdError for CatalogError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::UnknownRule(_) => None,
            Self::Register(err) => Some(err),
        }
    }
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(_) => f.write_str("the rule catalog could not be parsed"),
            Self::UnknownRule(name) => {
                write!(f, "the rule catalog names an unknown predicate `{name}`")
            }
            Self::Register(_) => f.write_str("a rule of the catalog could not be registered"),
        }
    }
}

impl From<ron::error::SpannedError> for CatalogError {
    fn from(err: ron::error::SpannedError) -> Self {
        Self::Parse(err)
    }
}

impl From<RegisterError> for CatalogError {
    fn from(err: RegisterError) -> Self {
        Self::Register(err)
    }
}

/// One entry of a rule catalog.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct CatalogEntry {
    rule: String,
    vuid: String,
    kind: ErrorKind,
    #[serde(default = "default_severity")]
    severity: Severity,
    #[serde(default)]
    checkpoint: Option<Checkpoint>,
}

fn default_severity() -> Severity {
    Severity::Error
}

const STANDARD_CATALOG: &str = include_str!("rules/catalog.ron");

/// An ordered set of rules.
#[derive(Debug, Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
    names: HashSet<Arc<str>>,
}

impl RuleEngine {
    /// Creates an engine without any rules.
    #[inline]
    pub fn new() -> Self {
        RuleEngine::default()
    }

    /// Returns the process-wide engine that holds the standard rules.
    ///
    /// The standard catalog is loaded the first time this is called.
    pub fn standard() -> Result<Arc<RuleEngine>, CatalogError> {
        static STANDARD: OnceLock<Result<Arc<RuleEngine>, CatalogError>> = OnceLock::new();

        STANDARD
            .get_or_init(|| {
                RuleEngine::from_catalog(STANDARD_CATALOG, Self::builtin_predicates())
                    .map(Arc::new)
            })
            .clone()
    }

    /// Returns a copy of the standard rules, to build a custom engine from.
    pub fn standard_rules() -> Result<Vec<Rule>, CatalogError> {
        Ok(RuleEngine::standard()?.rules().to_vec())
    }

    /// Creates an engine from a RON rule catalog. Each entry must name one of `predicates`.
    pub fn from_catalog(
        source: &str,
        predicates: &[(&str, Predicate)],
    ) -> Result<RuleEngine, CatalogError> {
        let entries: Vec<CatalogEntry> = ron::from_str(source)?;
        let mut engine = RuleEngine::new();

        for entry in entries {
            let CatalogEntry {
                rule,
                vuid,
                kind,
                severity,
                checkpoint,
            } = entry;

            let Some(&(_, predicate)) = predicates.iter().find(|(name, _)| *name == rule) else {
                return Err(CatalogError::UnknownRule(rule));
            };

            engine.register(Rule {
                name: rule.into(),
                vuid: vuid.into(),
                kind,
                severity,
                checkpoint,
                predicate,
            })?;
        }

        Ok(engine)
    }

    /// Adds a rule after the ones that are already registered.
    pub fn register(&mut self, rule: Rule) -> Result<(), RegisterError> {
        if !self.names.insert(rule.name.clone()) {
            return Err(RegisterError::DuplicateRule(rule.name));
        }

        self.rules.push(rule);

        Ok(())
    }

    /// Returns the rules in registration order.
    #[inline]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Returns the rule with the given name.
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| &*rule.name == name)
    }

    /// Evaluates every rule registered for the checkpoint of the operation, in registration
    /// order, and returns one diagnostic per violation.
    pub fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Diagnostic> {
        let checkpoint = ctx.operation().checkpoint();
        let mut diagnostics = Vec::new();

        for rule in self.rules.iter().filter(|rule| rule.applies_to(checkpoint)) {
            let Err(violations) = (rule.predicate)(ctx) else {
                continue;
            };

            diagnostics.extend(violations.into_iter().map(|violation| Diagnostic {
                vuid: rule.vuid.clone(),
                kind: rule.kind,
                severity: rule.severity,
                message: violation.message,
                objects: violation.objects,
            }));
        }

        diagnostics
    }

    /// Returns the predicates that the standard catalog can refer to, by name.
    pub fn builtin_predicates() -> &'static [(&'static str, Predicate)] {
        BUILTIN_PREDICATES
    }
}

macro_rules! predicates {
    ($($module:ident :: $name:ident),* $(,)?) => {
        &[$(
            (
                concat!(stringify!($module), "::", stringify!($name)),
                crate::$module::$name as Predicate,
            ),
        )*]
    };
}

static BUILTIN_PREDICATES: &[(&str, Predicate)] = predicates![
    rules::object_destroyed,
    rules::object_unknown,
    rules::destroy_image_in_use,
    rules::destroy_image_view_in_use,
    rules::destroy_buffer_in_use,
    rules::destroy_memory_in_use,
    rules::destroy_render_pass_in_use,
    rules::destroy_framebuffer_in_use,
    rules::destroy_command_buffer_in_use,
    rules::submit_ordering_cycle,
    image::format_or_external_format,
    image::external_format_with_format,
    image::external_format_known,
    image::external_format_mutable,
    image::external_format_usage,
    image::external_format_tiling,
    image::hardware_buffer_image_type,
    image::hardware_buffer_mip_levels,
    image::extent_width,
    image::extent_height,
    image::extent_depth,
    image::extent_1d,
    image::extent_2d,
    image::extent_max_width,
    image::extent_max_height,
    image::extent_max_depth,
    image::mip_levels_nonzero,
    image::mip_levels_max,
    image::array_layers_nonzero,
    image::cube_compatible,
    image::concurrent_family_count,
    image::concurrent_family_index,
    image::portability_multisample_array,
    image::view_base_mip_level,
    image::view_mip_level_count,
    image::view_base_array_layer,
    image::view_array_layer_count,
    image::view_2d_of_3d_compatible,
    image::view_2d_of_3d_level_count,
    image::view_format,
    image::view_usage,
    image::view_external_format,
    image::view_external_format_swizzle,
    image::portability_view_2d_on_3d,
    image::portability_view_swizzle,
    image::portability_view_reinterpretation,
    buffer::size_nonzero,
    buffer::concurrent_family_count,
    buffer::concurrent_family_index,
    memory::memory_type_index,
    memory::allocation_size_nonzero,
    memory::hardware_buffer_export_size,
    memory::hardware_buffer_import_size,
    memory::hardware_buffer_import_memory_type,
    memory::hardware_buffer_import_blob,
    memory::hardware_buffer_import_gpu_usage,
    memory::hardware_buffer_dedicated_format,
    memory::hardware_buffer_dedicated_extent,
    memory::hardware_buffer_dedicated_mip_levels,
    memory::hardware_buffer_dedicated_usage,
    memory::fd_import,
    memory::dedicated_image_size,
    memory::dedicated_buffer_size,
    memory::fd_export_declared,
    memory::fd_export_handle_type,
    memory::hardware_buffer_valid,
    binding::image_already_bound,
    binding::buffer_already_bound,
    binding::image_offset_in_range,
    binding::buffer_offset_in_range,
    binding::image_memory_type,
    binding::buffer_memory_type,
    binding::image_offset_alignment,
    binding::buffer_offset_alignment,
    binding::image_size,
    binding::buffer_size,
    binding::image_requires_dedicated,
    binding::buffer_requires_dedicated,
    binding::image_dedicated_mismatch,
    binding::buffer_dedicated_mismatch,
    binding::image_hardware_buffer_handle_type,
    binding::buffer_hardware_buffer_handle_type,
    binding::image_import_handle_type,
    binding::buffer_import_handle_type,
    binding::image_export_handle_type,
    binding::buffer_export_handle_type,
    binding::requirements_before_bind,
    binding::requirements2_before_bind,
    binding::subresource_layout_before_bind,
    binding::subresource_layout_tiling,
    render_pass::render_pass_subpass_count,
    render_pass::render_pass_attachment_index,
    render_pass::render_pass_final_layout,
    render_pass::framebuffer_extent_width,
    render_pass::framebuffer_extent_height,
    render_pass::framebuffer_layers,
    render_pass::framebuffer_attachment_count,
    render_pass::framebuffer_color_usage,
    render_pass::framebuffer_depth_stencil_usage,
    render_pass::framebuffer_input_usage,
    render_pass::framebuffer_format,
    render_pass::framebuffer_samples,
    render_pass::framebuffer_view_levels,
    render_pass::framebuffer_view_swizzle,
    render_pass::framebuffer_view_width,
    render_pass::framebuffer_view_height,
    render_pass::framebuffer_view_layers,
    render_pass::framebuffer_imageless_count,
    render_pass::framebuffer_imageless_color_usage,
    render_pass::framebuffer_imageless_depth_stencil_usage,
    render_pass::framebuffer_imageless_input_usage,
    render_pass::framebuffer_imageless_format,
    render_pass::framebuffer_imageless_width,
    render_pass::framebuffer_imageless_height,
    render_pass::begin_attachments_not_imageless,
    render_pass::begin_attachment_count,
    render_pass::begin_attachment_flags,
    render_pass::begin_attachment_usage,
    render_pass::begin_attachment_width,
    render_pass::begin_attachment_height,
    render_pass::begin_attachment_layers,
    render_pass::begin_view_format_count,
    render_pass::begin_view_formats,
    render_pass::begin_attachment_format,
    render_pass::begin_attachment_samples,
    render_pass::begin_attachment_levels,
    render_pass::begin_attachment_swizzle,
    render_pass::begin_attachment_3d,
    render_pass::begin_render_pass_compatible,
    render_pass::begin_in_render_pass,
    render_pass::end_outside_render_pass,
    sync::barrier_new_layout,
    sync::image_barrier_sharing,
    sync::buffer_barrier_sharing,
    sync::image_barrier_family_index,
    sync::buffer_barrier_family_index,
    sync::barrier_layout_in_render_pass,
    sync::barrier_ownership_in_render_pass,
    tracker::barrier_old_layout,
    tracker::submit_layout,
    tracker::submit_ownership,
    tracker::submit_image_acquire_unreleased,
    tracker::submit_buffer_acquire_unreleased,
    tracker::submit_image_duplicate_release,
    tracker::submit_buffer_duplicate_release,
    command_buffer::queue_family_index,
    command_buffer::queue_index,
    command_buffer::begin_pending,
    command_buffer::end_in_render_pass,
    command_buffer::clear_usage,
    command_buffer::clear_bound,
    command_buffer::clear_layout_mismatch,
    command_buffer::clear_layout,
    command_buffer::clear_in_render_pass,
    command_buffer::copy_dst_usage,
    command_buffer::copy_src_usage,
    command_buffer::copy_layout_mismatch,
    command_buffer::copy_layout,
    command_buffer::copy_in_render_pass,
    command_buffer::fill_usage,
    command_buffer::fill_bound,
    command_buffer::fill_in_render_pass,
    command_buffer::submit_not_executable,
    command_buffer::submit_destroyed_reference,
    command_buffer::submit_pending,
    command_buffer::submit_queue_family,
    swapchain::extent_nonzero,
    swapchain::array_layers_nonzero,
    swapchain::acquire_exhausted,
    swapchain::present_not_acquired,
    swapchain::present_layout,
    swapchain::destroy_swapchain_image,
];

pub(crate) fn object_destroyed(ctx: &RuleContext<'_>) -> RuleResult {
    let mut violations = Violations::new();

    for id in ctx.operation().referenced_objects() {
        if ctx.resources().is_destroyed(id) {
            violations.push(
                Violation::new(format!("{id:?} is used after it was destroyed")).object(id),
            );
        }
    }

    violations.into_result()
}

pub(crate) fn object_unknown(ctx: &RuleContext<'_>) -> RuleResult {
    let mut violations = Violations::new();

    for id in ctx.operation().referenced_objects() {
        if !ctx.resources().is_known(id) {
            violations.push(
                Violation::new(format!("{id:?} was never created on this device")).object(id),
            );
        }
    }

    violations.into_result()
}

/// Checks that the object that the operation destroys, if it's an `O`, is not in use by a
/// pending submission.
fn check_destroy_not_in_use<O: Object>(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::Destroy(id) = *ctx.operation() else {
        return Ok(());
    };

    if id.is::<O>() && ctx.resources().is_in_flight(id) {
        return Err(Violation::new(format!(
            "{id:?} is destroyed while a pending submission still uses it",
        ))
        .object(id)
        .into());
    }

    Ok(())
}

pub(crate) fn destroy_image_in_use(ctx: &RuleContext<'_>) -> RuleResult {
    check_destroy_not_in_use::<Image>(ctx)
}

pub(crate) fn destroy_image_view_in_use(ctx: &RuleContext<'_>) -> RuleResult {
    check_destroy_not_in_use::<ImageView>(ctx)
}

pub(crate) fn destroy_buffer_in_use(ctx: &RuleContext<'_>) -> RuleResult {
    check_destroy_not_in_use::<Buffer>(ctx)
}

pub(crate) fn destroy_memory_in_use(ctx: &RuleContext<'_>) -> RuleResult {
    check_destroy_not_in_use::<DeviceMemory>(ctx)
}

pub(crate) fn destroy_render_pass_in_use(ctx: &RuleContext<'_>) -> RuleResult {
    check_destroy_not_in_use::<RenderPass>(ctx)
}

pub(crate) fn destroy_framebuffer_in_use(ctx: &RuleContext<'_>) -> RuleResult {
    check_destroy_not_in_use::<Framebuffer>(ctx)
}

pub(crate) fn destroy_command_buffer_in_use(ctx: &RuleContext<'_>) -> RuleResult {
    check_destroy_not_in_use::<CommandBuffer>(ctx)
}

pub(crate) fn submit_ordering_cycle(ctx: &RuleContext<'_>) -> RuleResult {
    let Operation::SubmitBatches(batches) = *ctx.operation() else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (batch_index, batch) in batches.iter().enumerate() {
        for &dependency in &batch.wait_for {
            if dependency >= batches.len() {
                violations.push(Violation::new(format!(
                    "`batches[{batch_index}].wait_for` contains {dependency}, which is not less \
                    than the number of batches ({})",
                    batches.len(),
                )));
            }
        }
    }

    if violations.is_empty() && crate::device::submission_order(batches).is_none() {
        violations.push(Violation::new(
            "the `wait_for` hints of the batches form a cycle",
        ));
    }

    violations.into_result()
}
