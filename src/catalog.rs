use async_trait::async_trait;
use feed_types::category::{Category, CategoryRepository};
use feed_types::history::{FeedRepository, FeedState, HistoryRepository, ImportRun, RecentRuns};
use feed_types::product::{ExistingProduct, Product, ProductRepository};
use feed_types::MatchKey;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_rusqlite::Connection;
use typesafe_repository::async_ops::{Get, List, Save, Select};
use typesafe_repository::prelude::*;

/// Storage collaborators used by an import run.
#[derive(Clone)]
pub struct Repositories {
    pub products: Arc<dyn ProductRepository>,
    pub categories: Arc<dyn CategoryRepository>,
    pub history: Arc<dyn HistoryRepository>,
    pub feeds: Arc<dyn FeedRepository>,
}

/// All repositories over one SQLite connection.
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    pub async fn init(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS product (
                    id BLOB PRIMARY KEY,
                    feed_id BLOB NOT NULL,
                    slug TEXT NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT,
                    short_description TEXT,
                    price TEXT NOT NULL,
                    regular_price TEXT,
                    sale_price TEXT,
                    ean TEXT,
                    sku TEXT,
                    mpn TEXT,
                    external_id TEXT,
                    image_url TEXT,
                    gallery_images TEXT,
                    category_id BLOB,
                    brand TEXT,
                    manufacturer TEXT,
                    stock_status TEXT,
                    stock_quantity INTEGER,
                    affiliate_url TEXT,
                    button_text TEXT,
                    delivery_time TEXT,
                    attributes TEXT,
                    fingerprint TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS product_ean ON product(ean);
                CREATE INDEX IF NOT EXISTS product_sku ON product(sku);
                CREATE INDEX IF NOT EXISTS product_external_id ON product(external_id);
                CREATE INDEX IF NOT EXISTS product_feed ON product(feed_id);
                CREATE TABLE IF NOT EXISTS category (
                    id BLOB PRIMARY KEY,
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    parent_id BLOB,
                    product_count INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS category_slug ON category(slug, parent_id);
                CREATE TABLE IF NOT EXISTS import_history (
                    id BLOB PRIMARY KEY,
                    feed_id BLOB NOT NULL,
                    started_at TEXT NOT NULL,
                    finished_at TEXT,
                    status TEXT NOT NULL,
                    total_items INTEGER NOT NULL,
                    processed INTEGER NOT NULL,
                    created INTEGER NOT NULL,
                    updated INTEGER NOT NULL,
                    skipped INTEGER NOT NULL,
                    errors INTEGER NOT NULL,
                    triggered_by TEXT NOT NULL,
                    error_message TEXT
                );
                CREATE INDEX IF NOT EXISTS import_history_feed ON import_history(feed_id, started_at);
                CREATE TABLE IF NOT EXISTS feed (
                    id BLOB PRIMARY KEY,
                    status TEXT NOT NULL,
                    last_run_at TEXT,
                    last_error TEXT,
                    total_products INTEGER NOT NULL DEFAULT 0
                );",
            )?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub fn repositories(self) -> Repositories {
        let catalog = Arc::new(self);
        Repositories {
            products: catalog.clone(),
            categories: catalog.clone(),
            history: catalog.clone(),
            feeds: catalog,
        }
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn decimal(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| Decimal::from_str(&s))
        .transpose()
        .map_err(|err| conversion_error(idx, err))
}

fn json<T: DeserializeOwned + Default>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    match row.get::<_, Option<String>>(idx)? {
        Some(s) => serde_json::from_str(&s).map_err(|err| conversion_error(idx, err)),
        None => Ok(T::default()),
    }
}

fn parsed<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|err| conversion_error(idx, err))
}

fn count(row: &Row, idx: usize) -> rusqlite::Result<usize> {
    Ok(row.get::<_, i64>(idx)?.max(0) as usize)
}

const PRODUCT_COLUMNS: &str = "id, feed_id, slug, title, description, short_description, price, \
    regular_price, sale_price, ean, sku, mpn, external_id, image_url, gallery_images, category_id, \
    brand, manufacturer, stock_status, stock_quantity, affiliate_url, button_text, delivery_time, \
    attributes, fingerprint, is_active";

fn product_from_row(row: &Row) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        slug: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        short_description: row.get(5)?,
        price: decimal(row, 6)?.unwrap_or_default(),
        regular_price: decimal(row, 7)?,
        sale_price: decimal(row, 8)?,
        ean: row.get(9)?,
        sku: row.get(10)?,
        mpn: row.get(11)?,
        external_id: row.get(12)?,
        image_url: row.get(13)?,
        gallery_images: json(row, 14)?,
        category_id: row.get(15)?,
        brand: row.get(16)?,
        manufacturer: row.get(17)?,
        stock_status: row.get(18)?,
        stock_quantity: row.get(19)?,
        affiliate_url: row.get(20)?,
        button_text: row.get(21)?,
        delivery_time: row.get(22)?,
        attributes: json(row, 23)?,
        fingerprint: row.get::<_, Option<String>>(24)?.unwrap_or_default(),
        is_active: row.get(25)?,
    })
}

fn match_column(key: MatchKey) -> &'static str {
    match key {
        MatchKey::Ean => "ean",
        MatchKey::Sku => "sku",
        MatchKey::ExternalId => "external_id",
        MatchKey::Title => "title",
    }
}

impl Repository<Product> for SqliteCatalog {
    type Error = anyhow::Error;
}

#[async_trait]
impl Save<Product> for SqliteCatalog {
    async fn save(&self, p: Product) -> Result<(), Self::Error> {
        let gallery = serde_json::to_string(&p.gallery_images)?;
        let attributes = serde_json::to_string(&p.attributes)?;
        let now = OffsetDateTime::now_utc();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO product (id, feed_id, slug, title, description, short_description,
                        price, regular_price, sale_price, ean, sku, mpn, external_id, image_url,
                        gallery_images, category_id, brand, manufacturer, stock_status,
                        stock_quantity, affiliate_url, button_text, delivery_time, attributes,
                        fingerprint, is_active, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                        ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?27)
                    ON CONFLICT(id) DO UPDATE SET
                        feed_id = excluded.feed_id,
                        title = excluded.title,
                        description = excluded.description,
                        short_description = excluded.short_description,
                        price = excluded.price,
                        regular_price = excluded.regular_price,
                        sale_price = excluded.sale_price,
                        ean = excluded.ean,
                        sku = excluded.sku,
                        mpn = excluded.mpn,
                        external_id = excluded.external_id,
                        image_url = excluded.image_url,
                        gallery_images = excluded.gallery_images,
                        category_id = excluded.category_id,
                        brand = excluded.brand,
                        manufacturer = excluded.manufacturer,
                        stock_status = excluded.stock_status,
                        stock_quantity = excluded.stock_quantity,
                        affiliate_url = excluded.affiliate_url,
                        button_text = excluded.button_text,
                        delivery_time = excluded.delivery_time,
                        attributes = excluded.attributes,
                        fingerprint = excluded.fingerprint,
                        is_active = excluded.is_active,
                        updated_at = excluded.updated_at",
                    params![
                        p.id,
                        p.feed_id,
                        p.slug,
                        p.title,
                        p.description,
                        p.short_description,
                        p.price.to_string(),
                        p.regular_price.map(|d| d.to_string()),
                        p.sale_price.map(|d| d.to_string()),
                        p.ean,
                        p.sku,
                        p.mpn,
                        p.external_id,
                        p.image_url,
                        gallery,
                        p.category_id,
                        p.brand,
                        p.manufacturer,
                        p.stock_status,
                        p.stock_quantity,
                        p.affiliate_url,
                        p.button_text,
                        p.delivery_time,
                        attributes,
                        p.fingerprint,
                        p.is_active,
                        now,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Get<Product> for SqliteCatalog {
    async fn get_one(&self, id: &IdentityOf<Product>) -> Result<Option<Product>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {PRODUCT_COLUMNS} FROM product WHERE id = ?1"))?;
                Ok(stmt.query_row([id], product_from_row).optional()?)
            })
            .await?)
    }
}

#[async_trait]
impl ProductRepository for SqliteCatalog {
    async fn find_by_key(
        &self,
        key: MatchKey,
        value: &str,
    ) -> Result<Option<ExistingProduct>, Self::Error> {
        let value = value.to_string();
        let sql = format!(
            "SELECT id, fingerprint FROM product WHERE {} = ?1 LIMIT 1",
            match_column(key)
        );
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                Ok(stmt
                    .query_row([value], |row| {
                        Ok(ExistingProduct {
                            id: row.get(0)?,
                            fingerprint: row.get(1)?,
                        })
                    })
                    .optional()?)
            })
            .await?)
    }

    async fn count_by_feed(
        &self,
        feed: &IdentityOf<feed_types::feed::FeedConfig>,
    ) -> Result<usize, Self::Error> {
        let feed = *feed;
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM product WHERE feed_id = ?1 AND is_active = 1",
                    [feed],
                    |row| count(row, 0),
                )?)
            })
            .await?)
    }
}

fn category_from_row(row: &Row) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        parent_id: row.get(3)?,
        product_count: count(row, 4)?,
    })
}

impl Repository<Category> for SqliteCatalog {
    type Error = anyhow::Error;
}

#[async_trait]
impl Save<Category> for SqliteCatalog {
    async fn save(&self, c: Category) -> Result<(), Self::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO category (id, name, slug, parent_id, product_count)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        slug = excluded.slug,
                        parent_id = excluded.parent_id,
                        product_count = excluded.product_count",
                    params![c.id, c.name, c.slug, c.parent_id, c.product_count as i64],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Get<Category> for SqliteCatalog {
    async fn get_one(&self, id: &IdentityOf<Category>) -> Result<Option<Category>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, slug, parent_id, product_count FROM category WHERE id = ?1",
                        [id],
                        category_from_row,
                    )
                    .optional()?)
            })
            .await?)
    }
}

#[async_trait]
impl List<Category> for SqliteCatalog {
    async fn list(&self) -> Result<Vec<Category>, Self::Error> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, slug, parent_id, product_count FROM category ORDER BY name",
                )?;
                let c = stmt
                    .query_map([], category_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(c)
            })
            .await?)
    }
}

#[async_trait]
impl CategoryRepository for SqliteCatalog {
    async fn find_by_slug(
        &self,
        slug: &str,
        parent_id: Option<IdentityOf<Category>>,
    ) -> Result<Option<Category>, Self::Error> {
        let slug = slug.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, name, slug, parent_id, product_count FROM category
                        WHERE slug = ?1 AND parent_id IS ?2 LIMIT 1",
                        params![slug, parent_id],
                        category_from_row,
                    )
                    .optional()?)
            })
            .await?)
    }

    async fn recount_products(&self) -> Result<(), Self::Error> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "UPDATE category SET product_count = (
                        SELECT COUNT(*) FROM product p
                        WHERE p.category_id = category.id AND p.is_active = 1
                    )",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn run_from_row(row: &Row) -> rusqlite::Result<ImportRun> {
    Ok(ImportRun {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        status: parsed(row, 4)?,
        total_items: count(row, 5)?,
        processed: count(row, 6)?,
        created: count(row, 7)?,
        updated: count(row, 8)?,
        skipped: count(row, 9)?,
        errors: count(row, 10)?,
        triggered_by: row.get(11)?,
        error_message: row.get(12)?,
    })
}

const RUN_COLUMNS: &str = "id, feed_id, started_at, finished_at, status, total_items, processed, \
    created, updated, skipped, errors, triggered_by, error_message";

impl Repository<ImportRun> for SqliteCatalog {
    type Error = anyhow::Error;
}

#[async_trait]
impl Save<ImportRun> for SqliteCatalog {
    async fn save(&self, r: ImportRun) -> Result<(), Self::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO import_history (id, feed_id, started_at, finished_at, status,
                        total_items, processed, created, updated, skipped, errors, triggered_by,
                        error_message)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    ON CONFLICT(id) DO UPDATE SET
                        finished_at = excluded.finished_at,
                        status = excluded.status,
                        total_items = excluded.total_items,
                        processed = excluded.processed,
                        created = excluded.created,
                        updated = excluded.updated,
                        skipped = excluded.skipped,
                        errors = excluded.errors,
                        error_message = excluded.error_message",
                    params![
                        r.id,
                        r.feed_id,
                        r.started_at,
                        r.finished_at,
                        r.status.to_string(),
                        r.total_items as i64,
                        r.processed as i64,
                        r.created as i64,
                        r.updated as i64,
                        r.skipped as i64,
                        r.errors as i64,
                        r.triggered_by,
                        r.error_message,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Get<ImportRun> for SqliteCatalog {
    async fn get_one(&self, id: &IdentityOf<ImportRun>) -> Result<Option<ImportRun>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM import_history WHERE id = ?1"
                ))?;
                Ok(stmt.query_row([id], run_from_row).optional()?)
            })
            .await?)
    }
}

#[async_trait]
impl Select<ImportRun, RecentRuns> for SqliteCatalog {
    async fn select(&self, s: &RecentRuns) -> Result<Vec<ImportRun>, Self::Error> {
        let feed_id = s.feed_id;
        let limit = s.limit as i64;
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM import_history WHERE feed_id = ?1
                    ORDER BY started_at DESC, rowid DESC LIMIT ?2"
                ))?;
                let runs = stmt
                    .query_map(params![feed_id, limit], run_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(runs)
            })
            .await?)
    }
}

impl HistoryRepository for SqliteCatalog {}

impl Repository<FeedState> for SqliteCatalog {
    type Error = anyhow::Error;
}

#[async_trait]
impl Save<FeedState> for SqliteCatalog {
    async fn save(&self, f: FeedState) -> Result<(), Self::Error> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO feed (id, status, last_run_at, last_error, total_products)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(id) DO UPDATE SET
                        status = excluded.status,
                        last_run_at = excluded.last_run_at,
                        last_error = excluded.last_error,
                        total_products = excluded.total_products",
                    params![
                        f.id,
                        f.status.to_string(),
                        f.last_run_at,
                        f.last_error,
                        f.total_products as i64,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Get<FeedState> for SqliteCatalog {
    async fn get_one(&self, id: &IdentityOf<FeedState>) -> Result<Option<FeedState>, Self::Error> {
        let id = *id;
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, status, last_run_at, last_error, total_products FROM feed WHERE id = ?1",
                        [id],
                        |row| {
                            Ok(FeedState {
                                id: row.get(0)?,
                                status: parsed(row, 1)?,
                                last_run_at: row.get(2)?,
                                last_error: row.get(3)?,
                                total_products: count(row, 4)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await?)
    }
}

impl FeedRepository for SqliteCatalog {}
