pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod locks;
pub mod pricing;
pub mod rooms;
pub mod schedule;
