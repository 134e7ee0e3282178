use crate::entities::{anime_source, episode, prelude::*};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};

pub struct EpisodeRepository {
    conn: DatabaseConnection,
}

impl EpisodeRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(&self, id: i64) -> anyhow::Result<Option<episode::Model>> {
        Ok(Episode::find_by_id(id).one(&self.conn).await?)
    }

    pub async fn find_by_index(
        &self,
        source_id: i32,
        episode_index: i32,
    ) -> anyhow::Result<Option<episode::Model>> {
        Ok(Episode::find()
            .filter(episode::Column::SourceId.eq(source_id))
            .filter(episode::Column::EpisodeIndex.eq(episode_index))
            .one(&self.conn)
            .await?)
    }

    /// True when the episode has a danmaku file and a positive comment count.
    pub async fn is_present(&self, source_id: i32, episode_index: i32) -> anyhow::Result<bool> {
        let count = Episode::find()
            .filter(episode::Column::SourceId.eq(source_id))
            .filter(episode::Column::EpisodeIndex.eq(episode_index))
            .filter(episode::Column::DanmakuFilePath.is_not_null())
            .filter(episode::Column::CommentCount.gt(0))
            .count(&self.conn)
            .await?;
        Ok(count > 0)
    }

    /// Of `indices`, the subset already present under `(provider, media_id)`.
    pub async fn present_indices(
        &self,
        provider_name: &str,
        media_id: &str,
        indices: &[i32],
    ) -> anyhow::Result<Vec<i32>> {
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<i32> = Episode::find()
            .select_only()
            .column(episode::Column::EpisodeIndex)
            .inner_join(AnimeSource)
            .filter(anime_source::Column::ProviderName.eq(provider_name))
            .filter(anime_source::Column::MediaId.eq(media_id))
            .filter(episode::Column::EpisodeIndex.is_in(indices.iter().copied()))
            .filter(episode::Column::DanmakuFilePath.is_not_null())
            .filter(episode::Column::CommentCount.gt(0))
            .into_tuple()
            .all(&self.conn)
            .await?;

        let mut out: Vec<i32> = rows;
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    /// All present indices of a source, ascending.
    pub async fn present_indices_for_source(&self, source_id: i32) -> anyhow::Result<Vec<i32>> {
        let rows: Vec<i32> = Episode::find()
            .select_only()
            .column(episode::Column::EpisodeIndex)
            .filter(episode::Column::SourceId.eq(source_id))
            .filter(episode::Column::DanmakuFilePath.is_not_null())
            .filter(episode::Column::CommentCount.gt(0))
            .order_by_asc(episode::Column::EpisodeIndex)
            .into_tuple()
            .all(&self.conn)
            .await?;
        Ok(rows)
    }

    /// Create the row if `(source_id, episode_index)` does not exist yet.
    /// Rows are only created when comments are about to be written.
    pub async fn get_or_create(
        &self,
        source_id: i32,
        episode_index: i32,
        title: &str,
        url: Option<&str>,
        provider_episode_id: &str,
    ) -> anyhow::Result<i64> {
        if let Some(existing) = self.find_by_index(source_id, episode_index).await? {
            return Ok(existing.id);
        }

        let model = episode::ActiveModel {
            id: NotSet,
            source_id: Set(source_id),
            episode_index: Set(episode_index),
            title: Set(title.to_string()),
            url: Set(url.map(ToString::to_string)),
            provider_episode_id: Set(provider_episode_id.to_string()),
            danmaku_file_path: Set(None),
            comment_count: Set(0),
            fetched_at: Set(None),
        };
        let inserted = model.insert(&self.conn).await?;
        Ok(inserted.id)
    }

    /// Record a committed danmaku blob for an episode.
    pub async fn set_danmaku(
        &self,
        episode_id: i64,
        file_path: &str,
        comment_count: i32,
    ) -> anyhow::Result<()> {
        let Some(row) = Episode::find_by_id(episode_id).one(&self.conn).await? else {
            anyhow::bail!("episode {episode_id} not found");
        };

        let mut model: episode::ActiveModel = row.into();
        model.danmaku_file_path = Set(Some(file_path.to_string()));
        model.comment_count = Set(comment_count);
        model.fetched_at = Set(Some(chrono::Utc::now().to_rfc3339()));
        model.update(&self.conn).await?;
        Ok(())
    }

    pub async fn list_for_source(&self, source_id: i32) -> anyhow::Result<Vec<episode::Model>> {
        Ok(Episode::find()
            .filter(episode::Column::SourceId.eq(source_id))
            .order_by_asc(episode::Column::EpisodeIndex)
            .all(&self.conn)
            .await?)
    }
}
