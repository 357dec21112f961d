pub mod knowledge_graph;

pub use knowledge_graph::{Entity, EntityType, GraphSnapshot, Relationship, SchemeGraph};
