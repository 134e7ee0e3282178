use crate::entities::{config, prelude::*};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};

pub struct ConfigRepository {
    conn: DatabaseConnection,
}

impl ConfigRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = Config::find_by_id(key).one(&self.conn).await?;
        Ok(row.map(|r| r.config_value))
    }

    pub async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let model = config::ActiveModel {
            config_key: Set(key.to_string()),
            config_value: Set(value.to_string()),
            description: Set(None),
        };

        Config::insert(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(config::Column::ConfigKey)
                    .update_column(config::Column::ConfigValue)
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    /// Create rows for absent keys only; operator values are never
    /// overwritten.
    pub async fn init_defaults(&self, defaults: &[(&str, &str, &str)]) -> anyhow::Result<()> {
        for (key, value, description) in defaults {
            if Config::find_by_id(*key).one(&self.conn).await?.is_some() {
                continue;
            }
            let model = config::ActiveModel {
                config_key: Set((*key).to_string()),
                config_value: Set((*value).to_string()),
                description: Set(Some((*description).to_string())),
            };
            model.insert(&self.conn).await?;
        }
        Ok(())
    }
}
