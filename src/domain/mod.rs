pub mod events;
pub mod exchange_order;
pub mod order;
pub mod pair_state;
pub mod position;
pub mod ticker;

pub use events::*;
pub use exchange_order::*;
pub use order::*;
pub use pair_state::*;
pub use position::*;
pub use ticker::*;
