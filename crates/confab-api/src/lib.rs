pub mod auth;
pub mod conversations;
pub mod error;
pub mod friends;
pub mod messages;
pub mod middleware;

use std::sync::Arc;

use confab_db::Database;
use confab_engine::Engine;
use confab_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub engine: Engine,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}
