pub mod casting;
pub mod catalog;
pub mod llm;
pub mod reconciler;
pub mod store;
