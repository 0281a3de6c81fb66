pub mod docx;
pub mod epub;
pub mod pdf;
pub mod text;
