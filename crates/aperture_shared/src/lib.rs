pub mod arena;
pub mod contact;
pub mod entity;
pub mod lighting;
pub mod physics;
pub mod portal;
pub mod settings;
pub mod teleport;
pub mod transform;
pub mod visibility;
