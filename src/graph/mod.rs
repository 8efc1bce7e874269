// Render pass graph
//
// Samples declare their attachments and subpasses once; layouts, load/store
// ops, preserve lists and subpass dependencies are derived from how each
// attachment is used. `OffscreenTarget` turns the result into a render pass,
// images and framebuffers.

pub mod framebuffer;
pub mod pass;

use thiserror::Error;

pub use framebuffer::{columns, set_viewport, OffscreenTarget, TargetOptions};
pub use pass::{
    AttachmentDesc, AttachmentId, ClearValue, CompiledRenderPass, FinalUsage, RenderPassDesc,
    SubpassDesc,
};

/// Reasons a render pass description cannot be compiled
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("render pass has no subpasses")]
    NoSubpasses,

    #[error("subpass '{subpass}' references unknown attachment #{attachment}")]
    UnknownAttachment { subpass: String, attachment: usize },

    #[error("attachment '{0}' is not used by any subpass")]
    UnusedAttachment(String),

    #[error("subpass '{subpass}' references attachment '{attachment}' more than once")]
    DuplicateReference { subpass: String, attachment: String },

    #[error("subpass '{subpass}' uses depth attachment '{attachment}' as a color target")]
    DepthAsColor { subpass: String, attachment: String },

    #[error("subpass '{subpass}' uses color attachment '{attachment}' as depth")]
    ColorAsDepth { subpass: String, attachment: String },

    #[error("attachments of subpass '{subpass}' have different sample counts")]
    SampleCountMismatch { subpass: String },

    #[error("subpass '{subpass}' has {colors} color attachments but {resolves} resolve targets")]
    ResolveCountMismatch {
        subpass: String,
        colors: usize,
        resolves: usize,
    },

    #[error("subpass '{subpass}' cannot resolve into '{attachment}'")]
    InvalidResolve { subpass: String, attachment: String },

    #[error("subpass '{subpass}' reads '{attachment}' before anything writes it")]
    ReadBeforeWrite { subpass: String, attachment: String },

    #[error("subpass '{subpass}' both reads and writes '{attachment}'")]
    FeedbackLoop { subpass: String, attachment: String },
}
