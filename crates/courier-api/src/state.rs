use std::sync::Arc;

use courier_gateway::messenger::Messenger;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub messenger: Messenger,
}
