pub mod chat_view;
pub mod input_area;
pub mod sidebar;

pub use input_area::InputArea;
pub use sidebar::{RenameDraft, SidebarItem, SidebarView};
