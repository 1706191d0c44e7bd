use std::sync::Arc;

use uuid::Uuid;

use feedmail_db::Database;
use feedmail_mail::Mailer;

use crate::locale::Localizer;

/// Shared by every session.
#[derive(Clone)]
pub struct GatewayState {
    pub db: Arc<Database>,
    pub mailer: Arc<dyn Mailer>,
    /// Public URL embedded in verification links.
    pub base_url: String,
}

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: Uuid,
    pub localizer: Localizer,
}
