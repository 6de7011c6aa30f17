pub mod dhm;
pub mod glofas;

pub use dhm::DhmAdapter;
pub use glofas::GlofasAdapter;
