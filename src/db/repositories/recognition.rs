use crate::entities::{prelude::*, title_recognition};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};

pub struct RecognitionRepository {
    conn: DatabaseConnection,
}

impl RecognitionRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// The latest stored rule text, if any.
    pub async fn load(&self) -> anyhow::Result<Option<String>> {
        let row = TitleRecognition::find()
            .order_by_desc(title_recognition::Column::UpdatedAt)
            .one(&self.conn)
            .await?;
        Ok(row.map(|r| r.rules))
    }

    pub async fn save(&self, rules: &str) -> anyhow::Result<()> {
        let existing = TitleRecognition::find().one(&self.conn).await?;
        let now = chrono::Utc::now().to_rfc3339();

        match existing {
            Some(row) => {
                let mut model: title_recognition::ActiveModel = row.into();
                model.rules = Set(rules.to_string());
                model.updated_at = Set(now);
                model.update(&self.conn).await?;
            }
            None => {
                let model = title_recognition::ActiveModel {
                    id: sea_orm::NotSet,
                    rules: Set(rules.to_string()),
                    updated_at: Set(now),
                };
                model.insert(&self.conn).await?;
            }
        }
        Ok(())
    }
}
