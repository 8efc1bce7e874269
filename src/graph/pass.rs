// Render pass description and compilation
//
// Attachments are declared with how their contents are consumed after the
// pass (`FinalUsage`); subpasses list which attachments they write and read.
// Everything else in a `vk::RenderPassCreateInfo` follows from that.

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeMap;

use super::GraphError;
use crate::backend::image::{has_stencil, is_depth_format};

/// Index of an attachment inside its `RenderPassDesc`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(pub usize);

/// What happens to an attachment's contents once the pass ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalUsage {
    /// Sampled by a later pass
    Sampled,
    /// Copied to a buffer (frame capture)
    TransferSrc,
    /// Only used inside the pass
    Attachment,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearValue::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentDesc {
    pub name: String,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    /// Keep previous contents instead of clearing
    pub load: bool,
    /// Store even though nothing outside the pass reads it
    pub store: bool,
    pub final_usage: FinalUsage,
    pub clear: ClearValue,
}

impl AttachmentDesc {
    pub fn color(name: impl Into<String>, format: vk::Format) -> Self {
        Self {
            name: name.into(),
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load: false,
            store: false,
            final_usage: FinalUsage::Attachment,
            clear: ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
        }
    }

    pub fn depth(name: impl Into<String>, format: vk::Format) -> Self {
        Self {
            clear: ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            },
            ..Self::color(name, format)
        }
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn load(mut self) -> Self {
        self.load = true;
        self
    }

    pub fn store(mut self) -> Self {
        self.store = true;
        self
    }

    pub fn final_usage(mut self, usage: FinalUsage) -> Self {
        self.final_usage = usage;
        self
    }

    pub fn clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear = ClearValue::Color(color);
        self
    }

    fn stores(&self) -> bool {
        self.store || self.final_usage != FinalUsage::Attachment
    }

    fn is_depth(&self) -> bool {
        is_depth_format(self.format)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubpassDesc {
    pub name: String,
    pub color: Vec<AttachmentId>,
    pub depth: Option<AttachmentId>,
    pub inputs: Vec<AttachmentId>,
    pub resolve: Vec<AttachmentId>,
}

impl SubpassDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn color(mut self, attachments: &[AttachmentId]) -> Self {
        self.color = attachments.to_vec();
        self
    }

    pub fn depth(mut self, attachment: AttachmentId) -> Self {
        self.depth = Some(attachment);
        self
    }

    pub fn inputs(mut self, attachments: &[AttachmentId]) -> Self {
        self.inputs = attachments.to_vec();
        self
    }

    /// One resolve target per color attachment, in order
    pub fn resolve(mut self, attachments: &[AttachmentId]) -> Self {
        self.resolve = attachments.to_vec();
        self
    }

    fn references(&self) -> impl Iterator<Item = (AttachmentId, Use)> + '_ {
        self.color
            .iter()
            .map(|&id| (id, Use::Color))
            .chain(self.depth.map(|id| (id, Use::Depth)))
            .chain(self.inputs.iter().map(|&id| (id, Use::Input)))
            .chain(self.resolve.iter().map(|&id| (id, Use::Resolve)))
    }
}

/// How a subpass touches an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Use {
    Color,
    Depth,
    Input,
    Resolve,
}

impl Use {
    fn writes(self) -> bool {
        self != Use::Input
    }

    fn stage(self) -> vk::PipelineStageFlags {
        match self {
            Use::Color | Use::Resolve => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            Use::Depth => {
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
            }
            Use::Input => vk::PipelineStageFlags::FRAGMENT_SHADER,
        }
    }

    fn access(self) -> vk::AccessFlags {
        match self {
            Use::Color | Use::Resolve => {
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            Use::Depth => {
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            Use::Input => vk::AccessFlags::INPUT_ATTACHMENT_READ,
        }
    }

    /// Only writes need to be made available to later uses
    fn write_access(self) -> vk::AccessFlags {
        self.access()
            & (vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
    }

    fn layout(self, format: vk::Format) -> vk::ImageLayout {
        match self {
            Use::Color | Use::Resolve => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Use::Depth => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            Use::Input if is_depth_format(format) => {
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
            }
            Use::Input => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    fn image_usage(self) -> vk::ImageUsageFlags {
        match self {
            Use::Color | Use::Resolve => vk::ImageUsageFlags::COLOR_ATTACHMENT,
            Use::Depth => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            Use::Input => vk::ImageUsageFlags::INPUT_ATTACHMENT,
        }
    }
}

/// Ordered (subpass, use) list per attachment
type UseTable = Vec<Vec<(usize, Use)>>;

#[derive(Debug, Clone, Default)]
pub struct RenderPassDesc {
    attachments: Vec<AttachmentDesc>,
    subpasses: Vec<SubpassDesc>,
}

impl RenderPassDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attachment(&mut self, desc: AttachmentDesc) -> AttachmentId {
        self.attachments.push(desc);
        AttachmentId(self.attachments.len() - 1)
    }

    /// Append a subpass, returning its index
    pub fn subpass(&mut self, desc: SubpassDesc) -> u32 {
        self.subpasses.push(desc);
        (self.subpasses.len() - 1) as u32
    }

    pub fn attachments(&self) -> &[AttachmentDesc] {
        &self.attachments
    }

    pub fn get(&self, id: AttachmentId) -> Option<&AttachmentDesc> {
        self.attachments.get(id.0)
    }

    /// Usage flags an image must be created with to back this attachment
    pub fn image_usage(&self, id: AttachmentId) -> vk::ImageUsageFlags {
        let Some(attachment) = self.attachments.get(id.0) else {
            return vk::ImageUsageFlags::empty();
        };

        let mut usage = self
            .subpasses
            .iter()
            .flat_map(|subpass| subpass.references())
            .filter(|&(ref_id, _)| ref_id == id)
            .fold(vk::ImageUsageFlags::empty(), |acc, (_, u)| acc | u.image_usage());

        match attachment.final_usage {
            FinalUsage::Sampled => usage |= vk::ImageUsageFlags::SAMPLED,
            FinalUsage::TransferSrc => usage |= vk::ImageUsageFlags::TRANSFER_SRC,
            FinalUsage::Attachment => {
                // Contents never leave the pass
                if !attachment.load && !attachment.store {
                    usage |= vk::ImageUsageFlags::TRANSIENT_ATTACHMENT;
                }
            }
        }
        usage
    }

    fn use_table(&self) -> UseTable {
        let mut uses = vec![Vec::new(); self.attachments.len()];
        for (index, subpass) in self.subpasses.iter().enumerate() {
            for (id, u) in subpass.references() {
                if let Some(list) = uses.get_mut(id.0) {
                    list.push((index, u));
                }
            }
        }
        uses
    }

    fn validate(&self) -> Result<UseTable, GraphError> {
        if self.subpasses.is_empty() {
            return Err(GraphError::NoSubpasses);
        }

        for subpass in &self.subpasses {
            self.validate_subpass(subpass)?;
        }

        let uses = self.use_table();
        for (attachment, attachment_uses) in self.attachments.iter().zip(&uses) {
            match attachment_uses.first() {
                None => return Err(GraphError::UnusedAttachment(attachment.name.clone())),
                Some(&(subpass, Use::Input)) if !attachment.load => {
                    return Err(GraphError::ReadBeforeWrite {
                        subpass: self.subpasses[subpass].name.clone(),
                        attachment: attachment.name.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(uses)
    }

    fn validate_subpass(&self, subpass: &SubpassDesc) -> Result<(), GraphError> {
        let name = || subpass.name.clone();

        for (id, _) in subpass.references() {
            if id.0 >= self.attachments.len() {
                return Err(GraphError::UnknownAttachment {
                    subpass: name(),
                    attachment: id.0,
                });
            }
        }
        let attachment = |id: AttachmentId| &self.attachments[id.0];

        for &input in &subpass.inputs {
            let written = subpass.color.contains(&input)
                || subpass.depth == Some(input)
                || subpass.resolve.contains(&input);
            if written {
                return Err(GraphError::FeedbackLoop {
                    subpass: name(),
                    attachment: attachment(input).name.clone(),
                });
            }
        }

        let mut seen = Vec::new();
        for (id, _) in subpass.references() {
            if seen.contains(&id) {
                return Err(GraphError::DuplicateReference {
                    subpass: name(),
                    attachment: attachment(id).name.clone(),
                });
            }
            seen.push(id);
        }

        for &id in subpass.color.iter().chain(&subpass.resolve) {
            if attachment(id).is_depth() {
                return Err(GraphError::DepthAsColor {
                    subpass: name(),
                    attachment: attachment(id).name.clone(),
                });
            }
        }
        if let Some(id) = subpass.depth {
            if !attachment(id).is_depth() {
                return Err(GraphError::ColorAsDepth {
                    subpass: name(),
                    attachment: attachment(id).name.clone(),
                });
            }
        }

        let mut samples = subpass
            .color
            .iter()
            .chain(subpass.depth.as_ref())
            .map(|&id| attachment(id).samples);
        if let Some(first) = samples.next() {
            if samples.any(|s| s != first) {
                return Err(GraphError::SampleCountMismatch { subpass: name() });
            }
        }

        if !subpass.resolve.is_empty() {
            if subpass.resolve.len() != subpass.color.len() {
                return Err(GraphError::ResolveCountMismatch {
                    subpass: name(),
                    colors: subpass.color.len(),
                    resolves: subpass.resolve.len(),
                });
            }
            for (&source, &target) in subpass.color.iter().zip(&subpass.resolve) {
                let single = vk::SampleCountFlags::TYPE_1;
                if attachment(target).samples != single || attachment(source).samples == single {
                    return Err(GraphError::InvalidResolve {
                        subpass: name(),
                        attachment: attachment(target).name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Validate and derive the full render pass description
    pub fn compile(&self) -> Result<CompiledRenderPass, GraphError> {
        let uses = self.validate()?;

        let attachments = self
            .attachments
            .iter()
            .zip(&uses)
            .map(|(attachment, attachment_uses)| describe_attachment(attachment, attachment_uses))
            .collect();

        let subpasses = self
            .subpasses
            .iter()
            .enumerate()
            .map(|(index, subpass)| self.compile_subpass(index, subpass, &uses))
            .collect();

        let dependencies = self.dependencies(&uses);

        Ok(CompiledRenderPass {
            attachments,
            subpasses,
            dependencies,
            clear_values: self.attachments.iter().map(|a| a.clear).collect(),
        })
    }

    fn compile_subpass(&self, index: usize, subpass: &SubpassDesc, uses: &UseTable) -> CompiledSubpass {
        let reference = |id: AttachmentId, u: Use| vk::AttachmentReference {
            attachment: id.0 as u32,
            layout: u.layout(self.attachments[id.0].format),
        };

        // Untouched here, but needed again later
        let preserve = uses
            .iter()
            .enumerate()
            .filter(|(_, attachment_uses)| {
                let used_here = attachment_uses.iter().any(|&(s, _)| s == index);
                let before = attachment_uses.iter().any(|&(s, _)| s < index);
                let after = attachment_uses.iter().any(|&(s, _)| s > index);
                !used_here && before && after
            })
            .map(|(attachment, _)| attachment as u32)
            .collect();

        CompiledSubpass {
            color: subpass.color.iter().map(|&id| reference(id, Use::Color)).collect(),
            depth: subpass.depth.map(|id| reference(id, Use::Depth)),
            input: subpass.inputs.iter().map(|&id| reference(id, Use::Input)).collect(),
            resolve: subpass.resolve.iter().map(|&id| reference(id, Use::Resolve)).collect(),
            preserve,
        }
    }

    fn dependencies(&self, uses: &UseTable) -> Vec<vk::SubpassDependency> {
        let mut deps: BTreeMap<(u32, u32), vk::SubpassDependency> = BTreeMap::new();

        for (attachment, attachment_uses) in self.attachments.iter().zip(uses) {
            let (Some(&(first_pass, first_use)), Some(&(last_pass, last_use))) =
                (attachment_uses.first(), attachment_uses.last())
            else {
                continue;
            };

            // Consecutive uses inside the pass; read after read needs nothing
            for pair in attachment_uses.windows(2) {
                let ((src, src_use), (dst, dst_use)) = (pair[0], pair[1]);
                if !src_use.writes() && !dst_use.writes() {
                    continue;
                }
                merge_dependency(
                    &mut deps,
                    (src as u32, dst as u32),
                    (src_use.stage(), src_use.write_access()),
                    (dst_use.stage(), dst_use.access()),
                    vk::DependencyFlags::BY_REGION,
                );
            }

            // Previous frame's consumer of the same image
            let previous = match attachment.final_usage {
                FinalUsage::Sampled => (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::empty()),
                FinalUsage::TransferSrc => (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::empty()),
                FinalUsage::Attachment => (last_use.stage(), last_use.write_access()),
            };
            merge_dependency(
                &mut deps,
                (vk::SUBPASS_EXTERNAL, first_pass as u32),
                previous,
                (first_use.stage(), first_use.access()),
                vk::DependencyFlags::empty(),
            );

            let next = match attachment.final_usage {
                FinalUsage::Sampled => Some((
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::AccessFlags::SHADER_READ,
                )),
                FinalUsage::TransferSrc => Some((
                    vk::PipelineStageFlags::TRANSFER,
                    vk::AccessFlags::TRANSFER_READ,
                )),
                FinalUsage::Attachment => None,
            };
            if let Some(next) = next {
                merge_dependency(
                    &mut deps,
                    (last_pass as u32, vk::SUBPASS_EXTERNAL),
                    (last_use.stage(), last_use.write_access()),
                    next,
                    vk::DependencyFlags::empty(),
                );
            }
        }

        deps.into_values().collect()
    }
}

fn merge_dependency(
    deps: &mut BTreeMap<(u32, u32), vk::SubpassDependency>,
    (src, dst): (u32, u32),
    (src_stage, src_access): (vk::PipelineStageFlags, vk::AccessFlags),
    (dst_stage, dst_access): (vk::PipelineStageFlags, vk::AccessFlags),
    flags: vk::DependencyFlags,
) {
    let dep = deps.entry((src, dst)).or_insert_with(|| vk::SubpassDependency {
        src_subpass: src,
        dst_subpass: dst,
        ..Default::default()
    });
    dep.src_stage_mask |= src_stage;
    dep.src_access_mask |= src_access;
    dep.dst_stage_mask |= dst_stage;
    dep.dst_access_mask |= dst_access;
    dep.dependency_flags |= flags;
}

fn describe_attachment(attachment: &AttachmentDesc, uses: &[(usize, Use)]) -> vk::AttachmentDescription {
    // Validation guarantees at least one use
    let (first_use, last_use) = match (uses.first(), uses.last()) {
        (Some(&(_, first)), Some(&(_, last))) => (first, last),
        _ => (Use::Color, Use::Color),
    };
    let format = attachment.format;

    let initial_layout = if attachment.load {
        first_use.layout(format)
    } else {
        vk::ImageLayout::UNDEFINED
    };

    let final_layout = match attachment.final_usage {
        FinalUsage::Sampled if is_depth_format(format) => {
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        }
        FinalUsage::Sampled => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        FinalUsage::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        FinalUsage::Attachment => last_use.layout(format),
    };

    let load_op = if attachment.load {
        vk::AttachmentLoadOp::LOAD
    } else if first_use == Use::Resolve {
        // Fully overwritten by the resolve
        vk::AttachmentLoadOp::DONT_CARE
    } else {
        vk::AttachmentLoadOp::CLEAR
    };

    let store_op = if attachment.stores() {
        vk::AttachmentStoreOp::STORE
    } else {
        vk::AttachmentStoreOp::DONT_CARE
    };

    let (stencil_load_op, stencil_store_op) = if has_stencil(format) {
        (load_op, store_op)
    } else {
        (vk::AttachmentLoadOp::DONT_CARE, vk::AttachmentStoreOp::DONT_CARE)
    };

    vk::AttachmentDescription {
        format,
        samples: attachment.samples,
        load_op,
        store_op,
        stencil_load_op,
        stencil_store_op,
        initial_layout,
        final_layout,
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
pub struct CompiledSubpass {
    pub color: Vec<vk::AttachmentReference>,
    pub depth: Option<vk::AttachmentReference>,
    pub input: Vec<vk::AttachmentReference>,
    pub resolve: Vec<vk::AttachmentReference>,
    pub preserve: Vec<u32>,
}

/// Everything needed for `vkCreateRenderPass`
#[derive(Debug, Clone)]
pub struct CompiledRenderPass {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpasses: Vec<CompiledSubpass>,
    pub dependencies: Vec<vk::SubpassDependency>,
    pub clear_values: Vec<ClearValue>,
}

impl CompiledRenderPass {
    pub fn dependency(&self, src: u32, dst: u32) -> Option<&vk::SubpassDependency> {
        self.dependencies
            .iter()
            .find(|dep| dep.src_subpass == src && dep.dst_subpass == dst)
    }

    pub fn vk_clear_values(&self) -> Vec<vk::ClearValue> {
        self.clear_values.iter().map(|c| c.to_vk()).collect()
    }

    pub fn create(&self, device: &ash::Device) -> Result<vk::RenderPass> {
        let subpasses: Vec<vk::SubpassDescription> = self
            .subpasses
            .iter()
            .map(|subpass| {
                let mut description = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&subpass.color)
                    .input_attachments(&subpass.input)
                    .preserve_attachments(&subpass.preserve);
                if !subpass.resolve.is_empty() {
                    description = description.resolve_attachments(&subpass.resolve);
                }
                if let Some(depth) = &subpass.depth {
                    description = description.depth_stencil_attachment(depth);
                }
                description
            })
            .collect();

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&self.attachments)
            .subpasses(&subpasses)
            .dependencies(&self.dependencies);

        unsafe { device.create_render_pass(&render_pass_info, None) }
            .context("Failed to create render pass")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOR: vk::Format = vk::Format::R8G8B8A8_UNORM;
    const HDR: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    fn forward() -> RenderPassDesc {
        let mut desc = RenderPassDesc::new();
        let color = desc.attachment(
            AttachmentDesc::color("color", COLOR).final_usage(FinalUsage::TransferSrc),
        );
        let depth = desc.attachment(AttachmentDesc::depth("depth", DEPTH));
        desc.subpass(SubpassDesc::new("main").color(&[color]).depth(depth));
        desc
    }

    /// G-buffer fill, composition through input attachments, then
    /// transparent geometry against the same depth buffer
    fn three_subpasses() -> RenderPassDesc {
        let mut desc = RenderPassDesc::new();
        let output = desc.attachment(
            AttachmentDesc::color("output", COLOR).final_usage(FinalUsage::TransferSrc),
        );
        let albedo = desc.attachment(AttachmentDesc::color("albedo", COLOR));
        let normal = desc.attachment(AttachmentDesc::color("normal", HDR));
        let position = desc.attachment(AttachmentDesc::color("position", HDR));
        let depth = desc.attachment(AttachmentDesc::depth("depth", DEPTH));

        desc.subpass(
            SubpassDesc::new("gbuffer")
                .color(&[albedo, normal, position])
                .depth(depth),
        );
        desc.subpass(
            SubpassDesc::new("composition")
                .color(&[output])
                .inputs(&[albedo, normal, position]),
        );
        desc.subpass(SubpassDesc::new("transparent").color(&[output]).depth(depth));
        desc
    }

    #[test]
    fn forward_pass_layouts_and_ops() {
        let pass = forward().compile().unwrap();

        let color = &pass.attachments[0];
        assert_eq!(color.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(color.final_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);

        let depth = &pass.attachments[1];
        assert_eq!(depth.final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(depth.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);

        let subpass = &pass.subpasses[0];
        assert_eq!(subpass.color[0].layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(
            subpass.depth.map(|d| d.layout),
            Some(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        );
    }

    #[test]
    fn forward_pass_external_dependencies() {
        let pass = forward().compile().unwrap();
        assert_eq!(pass.dependencies.len(), 2);

        let incoming = pass.dependency(vk::SUBPASS_EXTERNAL, 0).unwrap();
        assert!(incoming.src_stage_mask.contains(vk::PipelineStageFlags::TRANSFER));
        assert!(incoming
            .dst_stage_mask
            .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert!(incoming
            .dst_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));

        let outgoing = pass.dependency(0, vk::SUBPASS_EXTERNAL).unwrap();
        assert_eq!(outgoing.dst_stage_mask, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(outgoing.dst_access_mask, vk::AccessFlags::TRANSFER_READ);
        assert_eq!(outgoing.src_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn input_attachments_get_framebuffer_local_dependencies() {
        let pass = three_subpasses().compile().unwrap();

        let gbuffer_to_composition = pass.dependency(0, 1).unwrap();
        assert_eq!(
            gbuffer_to_composition.src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            gbuffer_to_composition.src_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(
            gbuffer_to_composition.dst_stage_mask,
            vk::PipelineStageFlags::FRAGMENT_SHADER
        );
        assert_eq!(
            gbuffer_to_composition.dst_access_mask,
            vk::AccessFlags::INPUT_ATTACHMENT_READ
        );
        assert_eq!(gbuffer_to_composition.dependency_flags, vk::DependencyFlags::BY_REGION);

        // Output written by both later subpasses, depth skips composition
        assert!(pass.dependency(1, 2).is_some());
        let depth_reuse = pass.dependency(0, 2).unwrap();
        assert!(depth_reuse
            .src_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn depth_is_preserved_across_composition() {
        let pass = three_subpasses().compile().unwrap();
        assert!(pass.subpasses[0].preserve.is_empty());
        assert_eq!(pass.subpasses[1].preserve, vec![4]);
        assert!(pass.subpasses[2].preserve.is_empty());
    }

    #[test]
    fn gbuffer_attachments_are_transient_inputs() {
        let desc = three_subpasses();
        let pass = desc.compile().unwrap();

        let albedo = &pass.attachments[1];
        assert_eq!(albedo.final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(albedo.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(
            pass.subpasses[1].input[0].layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );

        assert_eq!(
            desc.image_usage(AttachmentId(1)),
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::INPUT_ATTACHMENT
                | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
        );
        assert_eq!(
            desc.image_usage(AttachmentId(0)),
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn multisampled_color_resolves_into_output() {
        let samples = vk::SampleCountFlags::TYPE_4;
        let mut desc = RenderPassDesc::new();
        let msaa = desc.attachment(AttachmentDesc::color("msaa", COLOR).samples(samples));
        let depth = desc.attachment(AttachmentDesc::depth("depth", DEPTH).samples(samples));
        let output = desc.attachment(
            AttachmentDesc::color("output", COLOR).final_usage(FinalUsage::TransferSrc),
        );
        desc.subpass(
            SubpassDesc::new("main")
                .color(&[msaa])
                .depth(depth)
                .resolve(&[output]),
        );

        let pass = desc.compile().unwrap();
        assert_eq!(pass.attachments[2].load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(pass.attachments[0].samples, samples);
        assert_eq!(pass.subpasses[0].resolve.len(), 1);
        assert!(desc
            .image_usage(msaa)
            .contains(vk::ImageUsageFlags::TRANSIENT_ATTACHMENT));
        assert!(!desc
            .image_usage(output)
            .contains(vk::ImageUsageFlags::TRANSIENT_ATTACHMENT));
    }

    #[test]
    fn sampled_attachments_end_in_read_only_layouts() {
        let mut desc = RenderPassDesc::new();
        let color = desc.attachment(AttachmentDesc::color("mirror", COLOR).final_usage(FinalUsage::Sampled));
        let depth = desc.attachment(AttachmentDesc::depth("shadow", DEPTH).final_usage(FinalUsage::Sampled));
        desc.subpass(SubpassDesc::new("offscreen").color(&[color]).depth(depth));

        let pass = desc.compile().unwrap();
        assert_eq!(pass.attachments[0].final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(
            pass.attachments[1].final_layout,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        );

        let outgoing = pass.dependency(0, vk::SUBPASS_EXTERNAL).unwrap();
        assert_eq!(outgoing.dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(outgoing.dst_access_mask, vk::AccessFlags::SHADER_READ);

        let incoming = pass.dependency(vk::SUBPASS_EXTERNAL, 0).unwrap();
        assert!(incoming.src_stage_mask.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert!(desc.image_usage(color).contains(vk::ImageUsageFlags::SAMPLED));
    }

    #[test]
    fn loaded_attachments_keep_contents() {
        let mut desc = RenderPassDesc::new();
        let color = desc.attachment(AttachmentDesc::color("accum", COLOR).load().store());
        desc.subpass(SubpassDesc::new("main").color(&[color]));

        let pass = desc.compile().unwrap();
        let attachment = &pass.attachments[0];
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert!(!desc
            .image_usage(color)
            .contains(vk::ImageUsageFlags::TRANSIENT_ATTACHMENT));
    }

    #[test]
    fn stencil_ops_follow_depth_ops_for_stencil_formats() {
        let mut desc = RenderPassDesc::new();
        let color = desc.attachment(AttachmentDesc::color("color", COLOR));
        let depth = desc.attachment(
            AttachmentDesc::depth("depth", vk::Format::D24_UNORM_S8_UINT).store(),
        );
        desc.subpass(SubpassDesc::new("main").color(&[color]).depth(depth));

        let pass = desc.compile().unwrap();
        assert_eq!(pass.attachments[1].stencil_load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(pass.attachments[1].stencil_store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn clear_values_follow_attachment_order() {
        let mut desc = forward();
        desc.attachments[0].clear = ClearValue::Color([0.1, 0.2, 0.3, 1.0]);
        let pass = desc.compile().unwrap();
        assert_eq!(
            pass.clear_values,
            vec![
                ClearValue::Color([0.1, 0.2, 0.3, 1.0]),
                ClearValue::DepthStencil { depth: 1.0, stencil: 0 }
            ]
        );
    }

    #[test]
    fn empty_pass_is_rejected() {
        let mut desc = RenderPassDesc::new();
        desc.attachment(AttachmentDesc::color("color", COLOR));
        assert_eq!(desc.compile().unwrap_err(), GraphError::NoSubpasses);
    }

    #[test]
    fn unknown_attachment_is_rejected() {
        let mut desc = RenderPassDesc::new();
        desc.subpass(SubpassDesc::new("main").color(&[AttachmentId(3)]));
        assert!(matches!(
            desc.compile(),
            Err(GraphError::UnknownAttachment { attachment: 3, .. })
        ));
    }

    #[test]
    fn unused_attachment_is_rejected() {
        let mut desc = forward();
        desc.attachment(AttachmentDesc::color("orphan", COLOR));
        assert_eq!(
            desc.compile().unwrap_err(),
            GraphError::UnusedAttachment("orphan".to_string())
        );
    }

    #[test]
    fn duplicate_reference_is_rejected() {
        let mut desc = RenderPassDesc::new();
        let color = desc.attachment(AttachmentDesc::color("color", COLOR));
        desc.subpass(SubpassDesc::new("main").color(&[color, color]));
        assert!(matches!(desc.compile(), Err(GraphError::DuplicateReference { .. })));
    }

    #[test]
    fn format_kinds_are_checked() {
        let mut desc = RenderPassDesc::new();
        let depth = desc.attachment(AttachmentDesc::depth("depth", DEPTH));
        desc.subpass(SubpassDesc::new("main").color(&[depth]));
        assert!(matches!(desc.compile(), Err(GraphError::DepthAsColor { .. })));

        let mut desc = RenderPassDesc::new();
        let color = desc.attachment(AttachmentDesc::color("color", COLOR));
        desc.subpass(SubpassDesc::new("main").depth(color));
        assert!(matches!(desc.compile(), Err(GraphError::ColorAsDepth { .. })));
    }

    #[test]
    fn mixed_sample_counts_are_rejected() {
        let mut desc = RenderPassDesc::new();
        let color = desc.attachment(
            AttachmentDesc::color("color", COLOR).samples(vk::SampleCountFlags::TYPE_4),
        );
        let depth = desc.attachment(AttachmentDesc::depth("depth", DEPTH));
        desc.subpass(SubpassDesc::new("main").color(&[color]).depth(depth));
        assert_eq!(
            desc.compile().unwrap_err(),
            GraphError::SampleCountMismatch {
                subpass: "main".to_string()
            }
        );
    }

    #[test]
    fn resolve_targets_are_checked() {
        let four = vk::SampleCountFlags::TYPE_4;

        let mut desc = RenderPassDesc::new();
        let a = desc.attachment(AttachmentDesc::color("a", COLOR).samples(four));
        let b = desc.attachment(AttachmentDesc::color("b", COLOR).samples(four));
        let out = desc.attachment(AttachmentDesc::color("out", COLOR));
        desc.subpass(SubpassDesc::new("main").color(&[a, b]).resolve(&[out]));
        assert!(matches!(
            desc.compile(),
            Err(GraphError::ResolveCountMismatch { colors: 2, resolves: 1, .. })
        ));

        // Resolving from a single-sampled source
        let mut desc = RenderPassDesc::new();
        let a = desc.attachment(AttachmentDesc::color("a", COLOR));
        let out = desc.attachment(AttachmentDesc::color("out", COLOR));
        desc.subpass(SubpassDesc::new("main").color(&[a]).resolve(&[out]));
        assert!(matches!(desc.compile(), Err(GraphError::InvalidResolve { .. })));

        // Resolving into a multisampled target
        let mut desc = RenderPassDesc::new();
        let a = desc.attachment(AttachmentDesc::color("a", COLOR).samples(four));
        let out = desc.attachment(AttachmentDesc::color("out", COLOR).samples(four));
        desc.subpass(SubpassDesc::new("main").color(&[a]).resolve(&[out]));
        assert!(matches!(desc.compile(), Err(GraphError::InvalidResolve { .. })));
    }

    #[test]
    fn reading_unwritten_input_is_rejected() {
        let mut desc = RenderPassDesc::new();
        let color = desc.attachment(AttachmentDesc::color("color", COLOR));
        let input = desc.attachment(AttachmentDesc::color("input", COLOR));
        desc.subpass(SubpassDesc::new("main").color(&[color]).inputs(&[input]));
        assert_eq!(
            desc.compile().unwrap_err(),
            GraphError::ReadBeforeWrite {
                subpass: "main".to_string(),
                attachment: "input".to_string()
            }
        );

        // Loaded contents count as written
        let mut desc = RenderPassDesc::new();
        let color = desc.attachment(AttachmentDesc::color("color", COLOR));
        let input = desc.attachment(AttachmentDesc::color("input", COLOR).load());
        desc.subpass(SubpassDesc::new("main").color(&[color]).inputs(&[input]));
        assert!(desc.compile().is_ok());
    }

    #[test]
    fn feedback_loop_is_rejected() {
        let mut desc = RenderPassDesc::new();
        let color = desc.attachment(AttachmentDesc::color("color", COLOR));
        desc.subpass(SubpassDesc::new("first").color(&[color]));
        desc.subpass(SubpassDesc::new("second").color(&[color]).inputs(&[color]));
        assert!(matches!(desc.compile(), Err(GraphError::FeedbackLoop { .. })));
    }
}
