pub mod constants;
pub mod dispatcher;
pub mod engine;
pub mod grid;
pub mod monster;
pub mod performance;
pub mod state;
pub mod systems;
pub mod template;
pub mod world;
