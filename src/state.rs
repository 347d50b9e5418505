use crate::{
    config::AppConfig,
    db::{DbPool, OrmConn},
    gateway::CheckoutGateway,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub orm: OrmConn,
    pub config: AppConfig,
    pub gateway: CheckoutGateway,
}
