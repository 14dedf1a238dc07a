pub mod email;
pub mod image;

pub use email::{
    AttachmentPayload, BatchItemPayload, NameList, SendEmailBatchRequest, SendEmailRequest,
};
pub use image::GenerateImageRequest;
