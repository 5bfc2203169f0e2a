pub mod user;
pub mod event;
pub mod hold;
pub mod inventory;
pub mod order;
pub mod search;

pub use user::User;
pub use event::{Event, EventLocationRow, EventStatus, EventWithDistance, Venue};
pub use hold::{Hold, HoldReason, HoldTarget, NewHold};
pub use inventory::{InventorySummary, Seat, TicketType, TicketTypeInventory};
pub use order::{ConsumeHold, FinalizedOrder, Order, OrderStatus, Ticket};
pub use search::{NearbyEvents, PaginationMeta, RadiusQuery, SearchFilters, SearchLocation, SearchPage};
