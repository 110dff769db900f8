use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use typesafe_repository::async_ops::{Get, List, Save};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use uuid::Uuid;

#[derive(Id, Serialize, Deserialize, Clone, Debug)]
pub struct Category {
    #[id]
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<IdentityOf<Category>>,
    pub product_count: usize,
}

impl PartialEq for Category {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Category {}

#[async_trait]
pub trait CategoryRepository:
    Repository<Category, Error = anyhow::Error>
    + Save<Category>
    + Get<Category>
    + List<Category>
    + Send
    + Sync
{
    async fn find_by_slug(
        &self,
        slug: &str,
        parent_id: Option<IdentityOf<Category>>,
    ) -> Result<Option<Category>, Self::Error>;

    /// Recomputes every category's product count from active products.
    async fn recount_products(&self) -> Result<(), Self::Error>;

    async fn find_or_create(
        &self,
        name: &str,
        slug: &str,
        parent_id: Option<IdentityOf<Category>>,
    ) -> Result<IdentityOf<Category>, Self::Error> {
        if let Some(existing) = self.find_by_slug(slug, parent_id).await? {
            return Ok(existing.id);
        }
        let category = Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            parent_id,
            product_count: 0,
        };
        let id = category.id;
        self.save(category).await?;
        Ok(id)
    }
}
