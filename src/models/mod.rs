mod batch;
mod filter;
mod meal;
mod notification;
mod session;

pub use batch::Batch;
pub use filter::MealFilter;
pub use meal::{compare_recent_first, EntityState, Meal, MealId, MealPayload};
pub use notification::{PushAction, PushData, PushEnvelope};
pub use session::Session;
