pub mod panels;
pub mod selection;
pub mod viewer;
