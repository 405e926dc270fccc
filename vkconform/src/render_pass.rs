//! Render passes, framebuffers and the rules that apply when a render pass instance begins.
//!
//! A render pass describes the attachments that are used during rendering, and the layouts they
//! are in. A framebuffer binds image views to those attachments. It does so either when it is
//! created (from a list of views), or, for an imageless framebuffer, only when a render pass
//! instance begins, in which case the framebuffer records the properties that the views must
//! have.
//!
//! Beginning a render pass instance transitions every attachment from its initial layout to the
//! layout it is first used in. Ending it transitions every attachment to its final layout.

use crate::{
    format::Format,
    image::{
        ImageCreateFlags, ImageLayout, ImageUsage, ImageView, ImageViewType, SampleCount,
    },
    rules::{Operation, RuleContext, RuleResult, Violation, Violations},
    Id, NonExhaustive, Object, ObjectType,
};
use smallvec::SmallVec;
use std::sync::Arc;

/// Describes an attachment that will be used in a render pass.
#[derive(Clone, Debug)]
pub struct AttachmentDescription {
    /// The format of the image that is going to be bound.
    ///
    /// The default value is [`Format::UNDEFINED`].
    pub format: Format,

    /// The number of samples of the image that is going to be bound.
    ///
    /// The default value is [`SampleCount::Sample1`].
    pub samples: SampleCount,

    /// The layout that the image must be in at the start of the render pass. The contents are
    /// discarded if this is [`ImageLayout::Undefined`].
    ///
    /// The default value is [`ImageLayout::Undefined`].
    pub initial_layout: ImageLayout,

    /// The layout that the image is transitioned to at the end of the render pass.
    ///
    /// The default value is [`ImageLayout::Undefined`], which must be overridden.
    pub final_layout: ImageLayout,

    pub _ne: NonExhaustive,
}

impl Default for AttachmentDescription {
    #[inline]
    fn default() -> Self {
        AttachmentDescription {
            format: Format::UNDEFINED,
            samples: SampleCount::Sample1,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::Undefined,
            _ne: NonExhaustive(()),
        }
    }
}

/// A reference in a subpass description to a particular attachment of the render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentReference {
    /// The index of the attachment.
    pub attachment: u32,

    /// The image layout that the attachment should be transitioned to at the start of the
    /// subpass.
    pub layout: ImageLayout,
}

/// Describes one of the subpasses of a render pass.
#[derive(Clone, Debug, Default)]
pub struct SubpassDescription {
    pub color_attachments: Vec<AttachmentReference>,
    pub depth_stencil_attachment: Option<AttachmentReference>,
    pub input_attachments: Vec<AttachmentReference>,
    pub _ne: NonExhaustive,
}

impl SubpassDescription {
    fn references(&self) -> impl Iterator<Item = &AttachmentReference> {
        self.color_attachments
            .iter()
            .chain(self.depth_stencil_attachment.iter())
            .chain(self.input_attachments.iter())
    }
}

/// Parameters to create a new [`RenderPass`].
#[derive(Clone, Debug, Default)]
pub struct RenderPassCreateInfo {
    /// The attachments available to the render pass.
    ///
    /// The default value is empty.
    pub attachments: Vec<AttachmentDescription>,

    /// The subpasses that make up the render pass.
    ///
    /// The default value is empty, which must be overridden.
    pub subpasses: Vec<SubpassDescription>,

    pub _ne: NonExhaustive,
}

/// How an attachment is used across the subpasses of a render pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttachmentUse {
    pub color: bool,
    pub depth_stencil: bool,
    pub input: bool,
}

/// The record of a render pass that was created on a device.
#[derive(Debug)]
pub struct RenderPass {
    id: Id<RenderPass>,
    attachments: Vec<AttachmentDescription>,
    subpasses: Vec<SubpassDescription>,
}

impl RenderPass {
    pub(crate) fn new(id: Id<RenderPass>, create_info: RenderPassCreateInfo) -> Self {
        let RenderPassCreateInfo {
            attachments,
            subpasses,
            _ne: _,
        } = create_info;

        RenderPass {
            id,
            attachments,
            subpasses,
        }
    }

    #[inline]
    pub fn id(&self) -> Id<RenderPass> {
        self.id
    }

    #[inline]
    pub fn attachments(&self) -> &[AttachmentDescription] {
        &self.attachments
    }

    #[inline]
    pub fn subpasses(&self) -> &[SubpassDescription] {
        &self.subpasses
    }

    /// Returns how the attachment with the given index is used by the subpasses.
    pub fn attachment_use(&self, attachment: u32) -> AttachmentUse {
        let mut attachment_use = AttachmentUse::default();

        for subpass in &self.subpasses {
            attachment_use.color |= subpass
                .color_attachments
                .iter()
                .any(|reference| reference.attachment == attachment);
            attachment_use.depth_stencil |= subpass
                .depth_stencil_attachment
                .is_some_and(|reference| reference.attachment == attachment);
            attachment_use.input |= subpass
                .input_attachments
                .iter()
                .any(|reference| reference.attachment == attachment);
        }

        attachment_use
    }

    /// Returns the layout of the first subpass reference to the attachment with the given
    /// index.
    pub fn first_layout(&self, attachment: u32) -> Option<ImageLayout> {
        self.subpasses.iter().find_map(|subpass| {
            subpass
                .references()
                .find(|reference| reference.attachment == attachment)
                .map(|reference| reference.layout)
        })
    }

    /// Returns whether framebuffers created for `other` can be used with this render pass.
    ///
    /// Two render passes are compatible when their attachments have the same formats and sample
    /// counts.
    pub fn is_compatible_with(&self, other: &RenderPass) -> bool {
        self.attachments.len() == other.attachments.len()
            && self
                .attachments
                .iter()
                .zip(&other.attachments)
                .all(|(a, b)| a.format == b.format && a.samples == b.samples)
    }
}

impl Object for RenderPass {
    const TYPE: ObjectType = ObjectType::RenderPass;

    fn storage(resources: &crate::resource::Resources) -> &crate::resource::Storage<Self> {
        &resources.render_passes
    }
}

/// The properties of the image views that will be bound to an attachment of an imageless
/// framebuffer.
#[derive(Clone, Debug)]
pub struct FramebufferAttachmentImageInfo {
    /// The default value is empty.
    pub flags: ImageCreateFlags,

    /// The default value is [`ImageUsage::empty()`], which must be overridden.
    pub usage: ImageUsage,

    /// The default value is `0`, which must be overridden.
    pub width: u32,

    /// The default value is `0`, which must be overridden.
    pub height: u32,

    /// The default value is `1`.
    pub layer_count: u32,

    /// The formats that views of the image can have.
    ///
    /// The default value is empty.
    pub view_formats: Vec<Format>,

    pub _ne: NonExhaustive,
}

impl Default for FramebufferAttachmentImageInfo {
    #[inline]
    fn default() -> Self {
        FramebufferAttachmentImageInfo {
            flags: ImageCreateFlags::empty(),
            usage: ImageUsage::empty(),
            width: 0,
            height: 0,
            layer_count: 1,
            view_formats: Vec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

/// The attachments of a framebuffer.
#[derive(Clone, Debug)]
pub enum FramebufferAttachments {
    /// The image views are bound when the framebuffer is created.
    Views(Vec<Id<ImageView>>),

    /// The framebuffer is imageless. The image views are provided when a render pass instance
    /// begins, and must match these descriptions.
    Imageless(Vec<FramebufferAttachmentImageInfo>),
}

/// Parameters to create a new [`Framebuffer`].
#[derive(Clone, Debug)]
pub struct FramebufferCreateInfo {
    /// The render pass that the framebuffer is created for.
    ///
    /// There is no default value.
    pub render_pass: Id<RenderPass>,

    /// The default value is `FramebufferAttachments::Views(Vec::new())`.
    pub attachments: FramebufferAttachments,

    /// The default value is `[0, 0]`, which must be overridden.
    pub extent: [u32; 2],

    /// The default value is `1`.
    pub layers: u32,

    pub _ne: NonExhaustive,
}

impl FramebufferCreateInfo {
    /// Returns a `FramebufferCreateInfo` for a framebuffer of `render_pass`, with the other
    /// fields set to their defaults.
    #[inline]
    pub fn render_pass(render_pass: Id<RenderPass>) -> Self {
        FramebufferCreateInfo {
            render_pass,
            attachments: FramebufferAttachments::Views(Vec::new()),
            extent: [0, 0],
            layers: 1,
            _ne: NonExhaustive(()),
        }
    }
}

/// The record of a framebuffer that was created on a device.
#[derive(Debug)]
pub struct Framebuffer {
    id: Id<Framebuffer>,
    render_pass: Arc<RenderPass>,
    attachments: FramebufferAttachments,
    extent: [u32; 2],
    layers: u32,
}

impl Framebuffer {
    pub(crate) fn new(
        id: Id<Framebuffer>,
        render_pass: Arc<RenderPass>,
        create_info: FramebufferCreateInfo,
    ) -> Self {
        let FramebufferCreateInfo {
            render_pass: _,
            attachments,
            extent,
            layers,
            _ne: _,
        } = create_info;

        Framebuffer {
            id,
            render_pass,
            attachments,
            extent,
            layers,
        }
    }

    #[inline]
    pub fn id(&self) -> Id<Framebuffer> {
        self.id
    }

    /// Returns the render pass that the framebuffer was created for.
    #[inline]
    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    #[inline]
    pub fn attachments(&self) -> &FramebufferAttachments {
        &self.attachments
    }

    #[inline]
    pub fn is_imageless(&self) -> bool {
        matches!(self.attachments, FramebufferAttachments::Imageless(_))
    }

    #[inline]
    pub fn extent(&self) -> [u32; 2] {
        self.extent
    }

    #[inline]
    pub fn layers(&self) -> u32 {
        self.layers
    }
}

impl Object for Framebuffer {
    const TYPE: ObjectType = ObjectType::Framebuffer;

    fn storage(resources: &crate::resource::Resources) -> &crate::resource::Storage<Self> {
        &resources.framebuffers
    }
}

/// Parameters to begin a render pass instance.
#[derive(Clone, Debug)]
pub struct RenderPassBeginInfo {
    /// The render pass to begin.
    pub render_pass: Id<RenderPass>,

    /// The framebuffer to render to.
    pub framebuffer: Id<Framebuffer>,

    /// For an imageless framebuffer, the image views to bind to the attachments.
    ///
    /// The default value is empty.
    pub attachments: Vec<Id<ImageView>>,

    pub _ne: NonExhaustive,
}

impl RenderPassBeginInfo {
    /// Returns a `RenderPassBeginInfo` that begins the render pass of `framebuffer`.
    #[inline]
    pub fn framebuffer(render_pass: Id<RenderPass>, framebuffer: Id<Framebuffer>) -> Self {
        RenderPassBeginInfo {
            render_pass,
            framebuffer,
            attachments: Vec::new(),
            _ne: NonExhaustive(()),
        }
    }
}

/// A render pass instance that is active in a command buffer being recorded.
#[derive(Clone, Debug)]
pub struct RenderPassInstance {
    pub(crate) render_pass: Arc<RenderPass>,
    pub(crate) framebuffer: Arc<Framebuffer>,
    pub(crate) attachments: SmallVec<[Arc<ImageView>; 4]>,
}

impl RenderPassInstance {
    #[inline]
    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    #[inline]
    pub fn framebuffer(&self) -> &Arc<Framebuffer> {
        &self.framebuffer
    }

    /// Returns the image views that are bound to the attachments.
    #[inline]
    pub fn attachments(&self) -> &[Arc<ImageView>] {
        &self.attachments
    }
}

fn render_pass_create_info<'a>(ctx: &'a RuleContext<'_>) -> Option<&'a RenderPassCreateInfo> {
    match ctx.operation() {
        Operation::CreateRenderPass(create_info) => Some(create_info),
        _ => None,
    }
}

pub(crate) fn render_pass_subpass_count(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = render_pass_create_info(ctx) else {
        return Ok(());
    };

    if create_info.subpasses.is_empty() {
        return Err(Violation::new("`subpasses` is empty").into());
    }

    Ok(())
}

pub(crate) fn render_pass_attachment_index(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = render_pass_create_info(ctx) else {
        return Ok(());
    };

    let attachment_count = create_info.attachments.len() as u32;
    let mut violations = Violations::new();

    for (subpass_index, subpass) in create_info.subpasses.iter().enumerate() {
        for reference in subpass.references() {
            if reference.attachment >= attachment_count {
                violations.push(Violation::new(format!(
                    "`subpasses[{subpass_index}]` references attachment {}, which is not less \
                    than the number of attachments ({attachment_count})",
                    reference.attachment,
                )));
            }
        }
    }

    violations.into_result()
}

pub(crate) fn render_pass_final_layout(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(create_info) = render_pass_create_info(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (attachment_index, attachment) in create_info.attachments.iter().enumerate() {
        if matches!(
            attachment.final_layout,
            ImageLayout::Undefined | ImageLayout::Preinitialized
        ) {
            violations.push(Violation::new(format!(
                "`attachments[{attachment_index}].final_layout` is `{:?}`",
                attachment.final_layout,
            )));
        }
    }

    violations.into_result()
}

fn framebuffer_create_info<'a>(
    ctx: &'a RuleContext<'_>,
) -> Option<(&'a FramebufferCreateInfo, Arc<RenderPass>)> {
    match ctx.operation() {
        Operation::CreateFramebuffer(create_info) => {
            let render_pass = ctx.resources().get(create_info.render_pass).ok()?;

            Some((create_info, render_pass))
        }
        _ => None,
    }
}

/// Returns the create info, the render pass and the views of a framebuffer that is created from
/// views. Returns `None` if any of them is missing.
#[allow(clippy::type_complexity)]
fn framebuffer_views<'a>(
    ctx: &'a RuleContext<'_>,
) -> Option<(
    &'a FramebufferCreateInfo,
    Arc<RenderPass>,
    SmallVec<[Arc<ImageView>; 4]>,
)> {
    let (create_info, render_pass) = framebuffer_create_info(ctx)?;
    let FramebufferAttachments::Views(views) = &create_info.attachments else {
        return None;
    };
    let views = views
        .iter()
        .map(|&view| ctx.resources().get(view).ok())
        .collect::<Option<_>>()?;

    Some((create_info, render_pass, views))
}

fn framebuffer_image_infos<'a>(
    ctx: &'a RuleContext<'_>,
) -> Option<(
    &'a FramebufferCreateInfo,
    Arc<RenderPass>,
    &'a [FramebufferAttachmentImageInfo],
)> {
    let (create_info, render_pass) = framebuffer_create_info(ctx)?;
    let FramebufferAttachments::Imageless(image_infos) = &create_info.attachments else {
        return None;
    };

    Some((create_info, render_pass, image_infos))
}

pub(crate) fn framebuffer_extent_width(ctx: &RuleContext<'_>) -> RuleResult {
    match framebuffer_create_info(ctx) {
        Some((create_info, _)) if create_info.extent[0] == 0 => {
            Err(Violation::new("`extent[0]` is zero").into())
        }
        _ => Ok(()),
    }
}

pub(crate) fn framebuffer_extent_height(ctx: &RuleContext<'_>) -> RuleResult {
    match framebuffer_create_info(ctx) {
        Some((create_info, _)) if create_info.extent[1] == 0 => {
            Err(Violation::new("`extent[1]` is zero").into())
        }
        _ => Ok(()),
    }
}

pub(crate) fn framebuffer_layers(ctx: &RuleContext<'_>) -> RuleResult {
    match framebuffer_create_info(ctx) {
        Some((create_info, _)) if create_info.layers == 0 => {
            Err(Violation::new("`layers` is zero").into())
        }
        _ => Ok(()),
    }
}

pub(crate) fn framebuffer_attachment_count(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((create_info, render_pass)) = framebuffer_create_info(ctx) else {
        return Ok(());
    };
    let FramebufferAttachments::Views(views) = &create_info.attachments else {
        return Ok(());
    };

    if views.len() != render_pass.attachments().len() {
        return Err(Violation::new(format!(
            "`attachments` contains {} image views, but the render pass has {} attachments",
            views.len(),
            render_pass.attachments().len(),
        ))
        .object(render_pass.id())
        .into());
    }

    Ok(())
}

/// Checks that every view is created with `usage` if the attachment is used in the way that
/// `is_used` selects.
fn check_view_usage(
    ctx: &RuleContext<'_>,
    is_used: fn(AttachmentUse) -> bool,
    usage: ImageUsage,
) -> RuleResult {
    let Some((_, render_pass, views)) = framebuffer_views(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (attachment_index, view) in views.iter().enumerate() {
        if is_used(render_pass.attachment_use(attachment_index as u32))
            && !view.usage().intersects(usage)
        {
            violations.push(
                Violation::new(format!(
                    "`attachments[{attachment_index}]` is used as {usage:?} attachment by the \
                    render pass, but the image view has usage {:?}",
                    view.usage(),
                ))
                .object(view.id()),
            );
        }
    }

    violations.into_result()
}

pub(crate) fn framebuffer_color_usage(ctx: &RuleContext<'_>) -> RuleResult {
    check_view_usage(ctx, |used| used.color, ImageUsage::COLOR_ATTACHMENT)
}

pub(crate) fn framebuffer_depth_stencil_usage(ctx: &RuleContext<'_>) -> RuleResult {
    check_view_usage(
        ctx,
        |used| used.depth_stencil,
        ImageUsage::DEPTH_STENCIL_ATTACHMENT,
    )
}

pub(crate) fn framebuffer_input_usage(ctx: &RuleContext<'_>) -> RuleResult {
    check_view_usage(ctx, |used| used.input, ImageUsage::INPUT_ATTACHMENT)
}

pub(crate) fn framebuffer_format(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((_, render_pass, views)) = framebuffer_views(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (attachment_index, (view, attachment)) in
        views.iter().zip(render_pass.attachments()).enumerate()
    {
        if view.format() != attachment.format {
            violations.push(
                Violation::new(format!(
                    "`attachments[{attachment_index}]` has format {:?}, but the attachment of the \
                    render pass has format {:?}",
                    view.format(),
                    attachment.format,
                ))
                .object(view.id()),
            );
        }
    }

    violations.into_result()
}

pub(crate) fn framebuffer_samples(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((_, render_pass, views)) = framebuffer_views(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (attachment_index, (view, attachment)) in
        views.iter().zip(render_pass.attachments()).enumerate()
    {
        if view.image().samples() != attachment.samples {
            violations.push(
                Violation::new(format!(
                    "the image of `attachments[{attachment_index}]` has {:?}, but the attachment \
                    of the render pass has {:?}",
                    view.image().samples(),
                    attachment.samples,
                ))
                .object(view.id()),
            );
        }
    }

    violations.into_result()
}

pub(crate) fn framebuffer_view_levels(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((_, _, views)) = framebuffer_views(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (attachment_index, view) in views.iter().enumerate() {
        if view.subresource_range().mip_levels.len() != 1 {
            violations.push(
                Violation::new(format!(
                    "`attachments[{attachment_index}]` does not have exactly one mip level",
                ))
                .object(view.id()),
            );
        }
    }

    violations.into_result()
}

pub(crate) fn framebuffer_view_swizzle(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((_, _, views)) = framebuffer_views(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (attachment_index, view) in views.iter().enumerate() {
        if !view.component_mapping().is_identity() {
            violations.push(
                Violation::new(format!(
                    "`attachments[{attachment_index}]` does not have an identity component \
                    mapping",
                ))
                .object(view.id()),
            );
        }
    }

    violations.into_result()
}

/// Checks one dimension of every view against the framebuffer.
fn check_view_extent(
    ctx: &RuleContext<'_>,
    dimension: &str,
    view_size: fn(&ImageView) -> u32,
    framebuffer_size: fn(&FramebufferCreateInfo) -> u32,
) -> RuleResult {
    let Some((create_info, _, views)) = framebuffer_views(ctx) else {
        return Ok(());
    };

    let required = framebuffer_size(create_info);
    let mut violations = Violations::new();

    for (attachment_index, view) in views.iter().enumerate() {
        let size = view_size(view);

        if size < required {
            violations.push(
                Violation::new(format!(
                    "the {dimension} of `attachments[{attachment_index}]` is {size}, which is \
                    less than the {dimension} of the framebuffer ({required})",
                ))
                .object(view.id()),
            );
        }
    }

    violations.into_result()
}

pub(crate) fn framebuffer_view_width(ctx: &RuleContext<'_>) -> RuleResult {
    check_view_extent(ctx, "width", |view| view.extent()[0], |info| info.extent[0])
}

pub(crate) fn framebuffer_view_height(ctx: &RuleContext<'_>) -> RuleResult {
    check_view_extent(ctx, "height", |view| view.extent()[1], |info| info.extent[1])
}

pub(crate) fn framebuffer_view_layers(ctx: &RuleContext<'_>) -> RuleResult {
    check_view_extent(ctx, "layer count", ImageView::layer_count, |info| info.layers)
}

pub(crate) fn framebuffer_imageless_count(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((_, render_pass, image_infos)) = framebuffer_image_infos(ctx) else {
        return Ok(());
    };

    if image_infos.len() != render_pass.attachments().len() {
        return Err(Violation::new(format!(
            "the framebuffer is imageless with {} attachment image infos, but the render pass \
            has {} attachments",
            image_infos.len(),
            render_pass.attachments().len(),
        ))
        .object(render_pass.id())
        .into());
    }

    Ok(())
}

fn check_image_info_usage(
    ctx: &RuleContext<'_>,
    is_used: fn(AttachmentUse) -> bool,
    usage: ImageUsage,
) -> RuleResult {
    let Some((_, render_pass, image_infos)) = framebuffer_image_infos(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (attachment_index, image_info) in image_infos.iter().enumerate() {
        if is_used(render_pass.attachment_use(attachment_index as u32))
            && !image_info.usage.intersects(usage)
        {
            violations.push(Violation::new(format!(
                "attachment {attachment_index} is used as {usage:?} attachment by the render \
                pass, but its image info has usage {:?}",
                image_info.usage,
            )));
        }
    }

    violations.into_result()
}

pub(crate) fn framebuffer_imageless_color_usage(ctx: &RuleContext<'_>) -> RuleResult {
    check_image_info_usage(ctx, |used| used.color, ImageUsage::COLOR_ATTACHMENT)
}

pub(crate) fn framebuffer_imageless_depth_stencil_usage(ctx: &RuleContext<'_>) -> RuleResult {
    check_image_info_usage(
        ctx,
        |used| used.depth_stencil,
        ImageUsage::DEPTH_STENCIL_ATTACHMENT,
    )
}

pub(crate) fn framebuffer_imageless_input_usage(ctx: &RuleContext<'_>) -> RuleResult {
    check_image_info_usage(ctx, |used| used.input, ImageUsage::INPUT_ATTACHMENT)
}

pub(crate) fn framebuffer_imageless_format(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((_, render_pass, image_infos)) = framebuffer_image_infos(ctx) else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (attachment_index, (image_info, attachment)) in
        image_infos.iter().zip(render_pass.attachments()).enumerate()
    {
        if !image_info.view_formats.contains(&attachment.format) {
            violations.push(Violation::new(format!(
                "the render pass attachment {attachment_index} has format {:?}, which is not in \
                the `view_formats` of its image info",
                attachment.format,
            )));
        }
    }

    violations.into_result()
}

fn check_image_info_extent(
    ctx: &RuleContext<'_>,
    dimension: &str,
    info_size: fn(&FramebufferAttachmentImageInfo) -> u32,
    framebuffer_size: fn(&FramebufferCreateInfo) -> u32,
) -> RuleResult {
    let Some((create_info, _, image_infos)) = framebuffer_image_infos(ctx) else {
        return Ok(());
    };

    let required = framebuffer_size(create_info);
    let mut violations = Violations::new();

    for (attachment_index, image_info) in image_infos.iter().enumerate() {
        let size = info_size(image_info);

        if size < required {
            violations.push(Violation::new(format!(
                "the {dimension} of the image info of attachment {attachment_index} is {size}, \
                which is less than the {dimension} of the framebuffer ({required})",
            )));
        }
    }

    violations.into_result()
}

pub(crate) fn framebuffer_imageless_width(ctx: &RuleContext<'_>) -> RuleResult {
    check_image_info_extent(ctx, "width", |info| info.width, |info| info.extent[0])
}

pub(crate) fn framebuffer_imageless_height(ctx: &RuleContext<'_>) -> RuleResult {
    check_image_info_extent(ctx, "height", |info| info.height, |info| info.extent[1])
}

fn begin_info<'a>(
    ctx: &'a RuleContext<'_>,
) -> Option<(&'a RenderPassBeginInfo, Arc<Framebuffer>)> {
    match ctx.operation() {
        Operation::BeginRenderPass(begin_info) => {
            let framebuffer = ctx.resources().get(begin_info.framebuffer).ok()?;

            Some((begin_info, framebuffer))
        }
        _ => None,
    }
}

/// The attachments of a render pass instance that begins with an imageless framebuffer, each
/// with the image info it must match and the render pass attachment it is bound to.
struct ImagelessAttachment<'a> {
    index: usize,
    view: Arc<ImageView>,
    image_info: &'a FramebufferAttachmentImageInfo,
    attachment: &'a AttachmentDescription,
}

/// Calls `check` for each attachment of a render pass instance that begins with an imageless
/// framebuffer, collecting the violations it returns.
fn check_imageless_attachments(
    ctx: &RuleContext<'_>,
    mut check: impl FnMut(&ImagelessAttachment<'_>) -> Option<String>,
) -> RuleResult {
    let Some((begin_info, framebuffer)) = begin_info(ctx) else {
        return Ok(());
    };
    let FramebufferAttachments::Imageless(image_infos) = framebuffer.attachments() else {
        return Ok(());
    };

    let mut violations = Violations::new();

    for (index, ((&view, image_info), attachment)) in begin_info
        .attachments
        .iter()
        .zip(image_infos)
        .zip(framebuffer.render_pass().attachments())
        .enumerate()
    {
        let Ok(view) = ctx.resources().get(view) else {
            continue;
        };
        let attachment = ImagelessAttachment {
            index,
            view,
            image_info,
            attachment,
        };

        if let Some(problem) = check(&attachment) {
            violations.push(Violation::new(problem).object(attachment.view.id()));
        }
    }

    violations.into_result()
}

pub(crate) fn begin_attachments_not_imageless(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((begin_info, framebuffer)) = begin_info(ctx) else {
        return Ok(());
    };

    if !framebuffer.is_imageless() && !begin_info.attachments.is_empty() {
        return Err(Violation::new(
            "`attachments` is not empty, but the framebuffer is not imageless",
        )
        .object(framebuffer.id())
        .into());
    }

    Ok(())
}

pub(crate) fn begin_attachment_count(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((begin_info, framebuffer)) = begin_info(ctx) else {
        return Ok(());
    };
    let FramebufferAttachments::Imageless(image_infos) = framebuffer.attachments() else {
        return Ok(());
    };

    if begin_info.attachments.len() != image_infos.len() {
        return Err(Violation::new(format!(
            "the framebuffer is imageless with {} attachments, but `attachments` contains {} \
            image views",
            image_infos.len(),
            begin_info.attachments.len(),
        ))
        .object(framebuffer.id())
        .into());
    }

    Ok(())
}

pub(crate) fn begin_attachment_flags(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        (a.view.image().flags() != a.image_info.flags).then(|| {
            format!(
                "the image of `attachments[{}]` was created with flags {:?}, but the framebuffer \
                expects {:?}",
                a.index,
                a.view.image().flags(),
                a.image_info.flags,
            )
        })
    })
}

pub(crate) fn begin_attachment_usage(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        (a.view.usage() != a.image_info.usage).then(|| {
            format!(
                "`attachments[{}]` has usage {:?}, but the framebuffer expects {:?}",
                a.index,
                a.view.usage(),
                a.image_info.usage,
            )
        })
    })
}

pub(crate) fn begin_attachment_width(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        let width = a.view.extent()[0];

        (width != a.image_info.width).then(|| {
            format!(
                "`attachments[{}]` has width {width}, but the framebuffer expects {}",
                a.index, a.image_info.width,
            )
        })
    })
}

pub(crate) fn begin_attachment_height(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        let height = a.view.extent()[1];

        (height != a.image_info.height).then(|| {
            format!(
                "`attachments[{}]` has height {height}, but the framebuffer expects {}",
                a.index, a.image_info.height,
            )
        })
    })
}

pub(crate) fn begin_attachment_layers(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        let layer_count = a.view.layer_count();

        (layer_count != a.image_info.layer_count).then(|| {
            format!(
                "`attachments[{}]` has {layer_count} layers, but the framebuffer expects {}",
                a.index, a.image_info.layer_count,
            )
        })
    })
}

pub(crate) fn begin_view_format_count(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        let view_formats = a.view.image().view_formats();

        (view_formats.len() != a.image_info.view_formats.len()).then(|| {
            format!(
                "the image of `attachments[{}]` was created with {} view formats, but the \
                framebuffer expects {}",
                a.index,
                view_formats.len(),
                a.image_info.view_formats.len(),
            )
        })
    })
}

pub(crate) fn begin_view_formats(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        let view_formats = a.view.image().view_formats();

        (view_formats.len() == a.image_info.view_formats.len()
            && view_formats != a.image_info.view_formats.as_slice())
        .then(|| {
            format!(
                "the image of `attachments[{}]` was created with view formats {view_formats:?}, \
                but the framebuffer expects {:?}",
                a.index, a.image_info.view_formats,
            )
        })
    })
}

pub(crate) fn begin_attachment_format(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        (a.view.format() != a.attachment.format).then(|| {
            format!(
                "`attachments[{}]` has format {:?}, but the render pass attachment has format \
                {:?}",
                a.index,
                a.view.format(),
                a.attachment.format,
            )
        })
    })
}

pub(crate) fn begin_attachment_samples(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        (a.view.image().samples() != a.attachment.samples).then(|| {
            format!(
                "the image of `attachments[{}]` has {:?}, but the render pass attachment has \
                {:?}",
                a.index,
                a.view.image().samples(),
                a.attachment.samples,
            )
        })
    })
}

pub(crate) fn begin_attachment_levels(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        (a.view.subresource_range().mip_levels.len() != 1).then(|| {
            format!(
                "`attachments[{}]` does not have exactly one mip level",
                a.index,
            )
        })
    })
}

pub(crate) fn begin_attachment_swizzle(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        (!a.view.component_mapping().is_identity()).then(|| {
            format!(
                "`attachments[{}]` does not have an identity component mapping",
                a.index,
            )
        })
    })
}

pub(crate) fn begin_attachment_3d(ctx: &RuleContext<'_>) -> RuleResult {
    check_imageless_attachments(ctx, |a| {
        (a.view.view_type() == ImageViewType::Dim3d)
            .then(|| format!("`attachments[{}]` is a 3D image view", a.index))
    })
}

pub(crate) fn begin_render_pass_compatible(ctx: &RuleContext<'_>) -> RuleResult {
    let Some((begin_info, framebuffer)) = begin_info(ctx) else {
        return Ok(());
    };
    let Ok(render_pass) = ctx.resources().get(begin_info.render_pass) else {
        return Ok(());
    };

    if !render_pass.is_compatible_with(framebuffer.render_pass()) {
        return Err(Violation::new(
            "`render_pass` is not compatible with the render pass that the framebuffer was \
            created for",
        )
        .object(render_pass.id())
        .object(framebuffer.id())
        .into());
    }

    Ok(())
}

pub(crate) fn begin_in_render_pass(ctx: &RuleContext<'_>) -> RuleResult {
    let (Operation::BeginRenderPass(_), Some(recording)) = (ctx.operation(), ctx.recording())
    else {
        return Ok(());
    };

    if let Some(instance) = recording.render_pass() {
        return Err(Violation::new(
            "a render pass instance is already active in the command buffer",
        )
        .object(instance.render_pass.id())
        .into());
    }

    Ok(())
}

pub(crate) fn end_outside_render_pass(ctx: &RuleContext<'_>) -> RuleResult {
    let (Operation::EndRenderPass, Some(recording)) = (ctx.operation(), ctx.recording()) else {
        return Ok(());
    };

    if recording.render_pass().is_none() {
        return Err(Violation::new("no render pass instance is active in the command buffer").into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        image::{ImageAspects, ImageCreateInfo, ImageSubresourceRange, ImageType, ImageViewCreateInfo},
        tests::{bound_image, color_image_info},
        ErrorKind,
    };

    fn color_render_pass(format: Format) -> RenderPassCreateInfo {
        RenderPassCreateInfo {
            attachments: vec![AttachmentDescription {
                format,
                final_layout: ImageLayout::ShaderReadOnlyOptimal,
                ..Default::default()
            }],
            subpasses: vec![SubpassDescription {
                color_attachments: vec![AttachmentReference {
                    attachment: 0,
                    layout: ImageLayout::ColorAttachmentOptimal,
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn attachment_image(extent: [u32; 3]) -> ImageCreateInfo {
        ImageCreateInfo {
            usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
            ..color_image_info(Format::R8G8B8A8_UNORM, extent)
        }
    }

    #[test]
    fn attachment_use_and_layouts() {
        let render_pass = RenderPass::new(
            Id::new(std::num::NonZero::new(1).unwrap()),
            color_render_pass(Format::R8G8B8A8_UNORM),
        );

        assert_eq!(
            render_pass.attachment_use(0),
            AttachmentUse {
                color: true,
                ..Default::default()
            },
        );
        assert_eq!(
            render_pass.first_layout(0),
            Some(ImageLayout::ColorAttachmentOptimal),
        );
        assert_eq!(render_pass.first_layout(1), None);
    }

    #[test]
    fn render_pass_structure() {
        let (device, monitor) = test_device!();

        monitor.expect("VUID-VkRenderPassCreateInfo-attachment-00834");
        monitor.expect("VUID-VkAttachmentDescription-finalLayout-00843");
        let mut create_info = color_render_pass(Format::R8G8B8A8_UNORM);
        create_info.attachments[0].final_layout = ImageLayout::Undefined;
        create_info.subpasses[0].input_attachments.push(AttachmentReference {
            attachment: 3,
            layout: ImageLayout::ShaderReadOnlyOptimal,
        });
        assert!(device.create_render_pass(&monitor, create_info).is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn framebuffer_views() {
        let (device, monitor) = test_device!();
        let render_pass = device
            .create_render_pass(&monitor, color_render_pass(Format::R8G8B8A8_UNORM))
            .unwrap();
        let image = device
            .create_image(
                &monitor,
                ImageCreateInfo {
                    usage: ImageUsage::SAMPLED,
                    mip_levels: 2,
                    ..color_image_info(Format::R8G8B8A8_UNORM, [32, 32, 1])
                },
            )
            .unwrap();
        let view = device
            .create_image_view(
                &monitor,
                ImageViewCreateInfo {
                    subresource_range: crate::image::ImageSubresourceRange {
                        aspects: crate::image::ImageAspects::COLOR,
                        mip_levels: 0..2,
                        array_layers: 0..1,
                    },
                    ..ImageViewCreateInfo::image(image)
                },
            )
            .unwrap();

        monitor.expect("VUID-VkFramebufferCreateInfo-pAttachments-00877");
        monitor.expect("VUID-VkFramebufferCreateInfo-pAttachments-00883");
        monitor.expect("VUID-VkFramebufferCreateInfo-flags-04533");
        assert!(device
            .create_framebuffer(
                &monitor,
                FramebufferCreateInfo {
                    attachments: FramebufferAttachments::Views(vec![view]),
                    extent: [64, 32],
                    ..FramebufferCreateInfo::render_pass(render_pass)
                },
            )
            .is_err());
        monitor.verify_found().unwrap();

        monitor.expect("VUID-VkFramebufferCreateInfo-attachmentCount-00876");
        assert!(device
            .create_framebuffer(
                &monitor,
                FramebufferCreateInfo {
                    extent: [32, 32],
                    ..FramebufferCreateInfo::render_pass(render_pass)
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn imageless_framebuffer_creation() {
        let (device, monitor) = test_device!();
        let render_pass = device
            .create_render_pass(&monitor, color_render_pass(Format::R8G8B8A8_UNORM))
            .unwrap();

        monitor.expect("VUID-VkFramebufferCreateInfo-flags-03201");
        monitor.expect("VUID-VkFramebufferCreateInfo-flags-03205");
        monitor.expect("VUID-VkFramebufferCreateInfo-flags-04541");
        assert!(device
            .create_framebuffer(
                &monitor,
                FramebufferCreateInfo {
                    attachments: FramebufferAttachments::Imageless(vec![
                        FramebufferAttachmentImageInfo {
                            usage: ImageUsage::SAMPLED,
                            width: 16,
                            height: 32,
                            view_formats: vec![Format::B8G8R8A8_UNORM],
                            ..Default::default()
                        },
                    ]),
                    extent: [32, 32],
                    ..FramebufferCreateInfo::render_pass(render_pass)
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn imageless_begin_extent_mismatch() {
        let (device, monitor) = test_device!();
        let render_pass = device
            .create_render_pass(&monitor, color_render_pass(Format::R8G8B8A8_UNORM))
            .unwrap();
        let image = bound_image(&device, &monitor, attachment_image([32, 64, 1]));
        let view = device
            .create_image_view(&monitor, ImageViewCreateInfo::image(image))
            .unwrap();
        let framebuffer = device
            .create_framebuffer(
                &monitor,
                FramebufferCreateInfo {
                    attachments: FramebufferAttachments::Imageless(vec![
                        FramebufferAttachmentImageInfo {
                            usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
                            width: 64,
                            height: 64,
                            view_formats: vec![Format::R8G8B8A8_UNORM],
                            ..Default::default()
                        },
                    ]),
                    extent: [32, 32],
                    ..FramebufferCreateInfo::render_pass(render_pass)
                },
            )
            .unwrap();

        let mut builder = device.begin_command_buffer(&monitor, device.queue(0, 0)).unwrap();

        monitor.expect("VUID-VkRenderPassBeginInfo-framebuffer-03211");
        // The image was created without a format list.
        monitor.set_unexpected_error("VUID-VkRenderPassBeginInfo-framebuffer-03214");
        let err = builder
            .begin_render_pass(
                &monitor,
                &RenderPassBeginInfo {
                    attachments: vec![view],
                    ..RenderPassBeginInfo::framebuffer(render_pass, framebuffer)
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
        monitor.verify_found().unwrap();
    }

    #[test]
    fn begin_with_views_of_imageless_framebuffer() {
        let (device, monitor) = test_device!();
        let render_pass = device
            .create_render_pass(&monitor, color_render_pass(Format::R8G8B8A8_UNORM))
            .unwrap();
        let image = bound_image(
            &device,
            &monitor,
            ImageCreateInfo {
                view_formats: vec![Format::R8G8B8A8_UNORM],
                ..attachment_image([32, 32, 1])
            },
        );
        let view = device
            .create_image_view(&monitor, ImageViewCreateInfo::image(image))
            .unwrap();
        let framebuffer = device
            .create_framebuffer(
                &monitor,
                FramebufferCreateInfo {
                    attachments: FramebufferAttachments::Imageless(vec![
                        FramebufferAttachmentImageInfo {
                            usage: ImageUsage::COLOR_ATTACHMENT,
                            width: 32,
                            height: 32,
                            view_formats: vec![Format::R8G8B8A8_UNORM],
                            ..Default::default()
                        },
                    ]),
                    extent: [32, 32],
                    ..FramebufferCreateInfo::render_pass(render_pass)
                },
            )
            .unwrap();

        let mut builder = device.begin_command_buffer(&monitor, device.queue(0, 0)).unwrap();

        monitor.expect("VUID-VkRenderPassBeginInfo-framebuffer-04627");
        monitor.expect("VUID-VkRenderPassBeginInfo-framebuffer-03208");
        assert!(builder
            .begin_render_pass(
                &monitor,
                &RenderPassBeginInfo {
                    attachments: vec![view, view],
                    ..RenderPassBeginInfo::framebuffer(render_pass, framebuffer)
                },
            )
            .is_err());
        monitor.verify_found().unwrap();
    }

    #[test]
    fn nesting_and_final_layouts() {
        let (device, monitor) = test_device!();
        let queue = device.queue(0, 0);
        let render_pass = device
            .create_render_pass(&monitor, color_render_pass(Format::R8G8B8A8_UNORM))
            .unwrap();
        let image = bound_image(&device, &monitor, attachment_image([32, 32, 1]));
        let view = device
            .create_image_view(&monitor, ImageViewCreateInfo::image(image))
            .unwrap();
        let framebuffer = device
            .create_framebuffer(
                &monitor,
                FramebufferCreateInfo {
                    attachments: FramebufferAttachments::Views(vec![view]),
                    extent: [32, 32],
                    ..FramebufferCreateInfo::render_pass(render_pass)
                },
            )
            .unwrap();
        let begin_info = RenderPassBeginInfo::framebuffer(render_pass, framebuffer);

        let mut builder = device.begin_command_buffer(&monitor, queue).unwrap();

        monitor.expect("VUID-vkCmdEndRenderPass-renderpass");
        assert!(builder.end_render_pass(&monitor).is_err());
        monitor.verify_found().unwrap();

        monitor.expect_success();
        builder.begin_render_pass(&monitor, &begin_info).unwrap();
        monitor.verify_found().unwrap();

        monitor.expect("VUID-vkCmdBeginRenderPass-renderpass");
        assert!(builder.begin_render_pass(&monitor, &begin_info).is_err());
        monitor.verify_found().unwrap();

        monitor.expect_success();
        builder.end_render_pass(&monitor).unwrap();
        let command_buffer = builder.end(&monitor).unwrap();
        device.queue_submit(&monitor, queue, &[command_buffer]).unwrap();
        monitor.verify_found().unwrap();

        let state = device.resources().get(image).unwrap().state().get(0).unwrap();
        assert_eq!(state.layout, ImageLayout::ShaderReadOnlyOptimal);
        assert_eq!(state.last_write, crate::sync::PipelineStages::COLOR_ATTACHMENT_OUTPUT);

        // The framebuffer and its view are pinned until the queue is idle.
        monitor.expect("VUID-vkDestroyFramebuffer-framebuffer-00892");
        let err = device.destroy_framebuffer(&monitor, framebuffer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UseAfterFree);
        monitor.verify_found().unwrap();

        device.queue_wait_idle(queue);
        monitor.expect_success();
        device.destroy_framebuffer(&monitor, framebuffer).unwrap();
        monitor.verify_found().unwrap();
    }

    #[test]
    fn array_view_of_3d_image_transitions_whole_level() {
        let (device, monitor) = test_device!();
        let queue = device.queue(0, 0);
        let render_pass = device
            .create_render_pass(&monitor, color_render_pass(Format::R8G8B8A8_UNORM))
            .unwrap();
        let image = bound_image(
            &device,
            &monitor,
            ImageCreateInfo {
                flags: ImageCreateFlags::ARRAY_2D_COMPATIBLE,
                image_type: ImageType::Dim3d,
                mip_levels: 2,
                ..attachment_image([32, 32, 8])
            },
        );

        // Mip level 1 is 16x16 with 4 depth slices, which the view addresses as array layers.
        monitor.expect_success();
        let view = device
            .create_image_view(
                &monitor,
                ImageViewCreateInfo {
                    view_type: ImageViewType::Dim2dArray,
                    subresource_range: ImageSubresourceRange {
                        aspects: ImageAspects::COLOR,
                        mip_levels: 1..2,
                        array_layers: 0..4,
                    },
                    ..ImageViewCreateInfo::image(image)
                },
            )
            .unwrap();
        let framebuffer = device
            .create_framebuffer(
                &monitor,
                FramebufferCreateInfo {
                    attachments: FramebufferAttachments::Views(vec![view]),
                    extent: [16, 16],
                    layers: 4,
                    ..FramebufferCreateInfo::render_pass(render_pass)
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
        builder.end_render_pass(&monitor).unwrap();
        let command_buffer = builder.end(&monitor).unwrap();
        device.queue_submit(&monitor, queue, &[command_buffer]).unwrap();
        monitor.verify_found().unwrap();

        // Depth slices aren't tracked separately, so the whole of mip level 1 is transitioned and
        // mip level 0 is untouched.
        let record = device.resources().get(image).unwrap();
        let level_1 = record.iter_ranges(&ImageSubresourceRange {
            aspects: ImageAspects::COLOR,
            mip_levels: 1..2,
            array_layers: 0..1,
        });
        assert_eq!(level_1.as_slice(), &[1..2]);

        let states = record.state().states();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].0, 0..1);
        assert_eq!(states[0].1.layout, ImageLayout::Undefined);
        assert_eq!(states[1].0, 1..2);
        assert_eq!(states[1].1.layout, ImageLayout::ShaderReadOnlyOptimal);
        assert_eq!(
            states[1].1.last_write,
            crate::sync::PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        );
    }
}
