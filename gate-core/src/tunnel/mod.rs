pub mod app;
pub mod holder;
pub mod player;
pub mod room;
pub mod runtime;

pub use app::{AppTunnel, ForwardMessage, TunnelType};
pub use holder::TunnelHolder;
pub use player::{PlayerTunnel, WorkerControl};
pub use room::RoomTunnel;
pub use runtime::{Pusher, Tunnel};
