// Interview views: mounting a view per bot, and the control API over its call session.

pub mod handlers;
pub mod registry;
