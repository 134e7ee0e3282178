use crate::entities::external_api_log;
use sea_orm::{ActiveModelTrait, DatabaseConnection, NotSet, Set};

pub struct ApiLogRepository {
    conn: DatabaseConnection,
}

impl ApiLogRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn add(
        &self,
        ip_address: &str,
        endpoint: &str,
        status_code: i32,
        message: Option<&str>,
    ) -> anyhow::Result<()> {
        let model = external_api_log::ActiveModel {
            id: NotSet,
            access_time: Set(chrono::Utc::now().to_rfc3339()),
            ip_address: Set(ip_address.to_string()),
            endpoint: Set(endpoint.to_string()),
            status_code: Set(status_code),
            message: Set(message.map(ToString::to_string)),
        };
        model.insert(&self.conn).await?;
        Ok(())
    }
}
