use feed_types::category::{Category, CategoryRepository};
use lazy_regex::regex;
use std::collections::HashMap;
use std::sync::Arc;
use typesafe_repository::IdentityOf;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

pub const PATH_DELIMITERS: &[&str] = &["|", " > ", "/"];
pub const MAX_SLUG_LEN: usize = 200;

fn transliterate(c: char) -> Option<&'static str> {
    Some(match c {
        'á' | 'ä' | 'à' | 'â' | 'ą' => "a",
        'č' | 'ć' | 'ç' => "c",
        'ď' => "d",
        'é' | 'ě' | 'è' | 'ê' | 'ë' | 'ę' => "e",
        'í' | 'ì' | 'î' | 'ï' => "i",
        'ĺ' | 'ľ' | 'ł' => "l",
        'ň' | 'ń' | 'ñ' => "n",
        'ó' | 'ô' | 'ö' | 'ò' | 'ő' => "o",
        'ŕ' | 'ř' => "r",
        'š' | 'ś' => "s",
        'ť' => "t",
        'ú' | 'ů' | 'ü' | 'ù' | 'û' | 'ű' => "u",
        'ý' | 'ÿ' => "y",
        'ž' | 'ź' | 'ż' => "z",
        'ß' => "ss",
        _ => return None,
    })
}

/// Lower-case ASCII slug: diacritics folded, other runs of non-alphanumerics become `-`.
pub fn slugify(name: &str) -> String {
    let folded: String = name
        .to_lowercase()
        .chars()
        .map(|c| transliterate(c).map(str::to_string).unwrap_or_else(|| c.to_string()))
        .collect();
    let slug = regex!("[^a-z0-9]+").replace_all(&folded, "-");
    let mut slug = slug.trim_matches('-').to_string();
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        slug = slug.trim_end_matches('-').to_string();
    }
    slug
}

/// Deterministic slug for category nodes. Names without any ASCII letters or digits
/// get a stable hash instead of an empty slug.
pub fn category_slug(name: &str) -> String {
    let slug = slugify(name);
    if slug.is_empty() {
        format!("c-{:016x}", xxh3_64(name.trim().to_lowercase().as_bytes()))
    } else {
        slug
    }
}

/// Product slugs carry a random suffix so equal titles do not collide.
pub fn product_slug(title: &str) -> String {
    let base = slugify(title);
    let suffix = Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..8];
    if base.is_empty() {
        format!("product-{suffix}")
    } else {
        let base = &base[..base.len().min(MAX_SLUG_LEN - 9)];
        format!("{}-{suffix}", base.trim_end_matches('-'))
    }
}

/// Splits on the first delimiter that yields more than one segment.
pub fn split_path(path: &str) -> Vec<&str> {
    let segments = PATH_DELIMITERS
        .iter()
        .map(|d| path.split(*d).collect::<Vec<_>>())
        .find(|parts| parts.len() > 1)
        .unwrap_or_else(|| vec![path]);
    segments
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Resolves category paths to leaf ids, creating missing nodes. The cache lives for one run.
pub struct CategoryResolver {
    repo: Arc<dyn CategoryRepository>,
    cache: HashMap<String, IdentityOf<Category>>,
}

impl CategoryResolver {
    pub fn new(repo: Arc<dyn CategoryRepository>) -> Self {
        Self {
            repo,
            cache: HashMap::new(),
        }
    }

    pub async fn resolve(
        &mut self,
        path: &str,
    ) -> Result<Option<IdentityOf<Category>>, anyhow::Error> {
        if let Some(id) = self.cache.get(path) {
            return Ok(Some(*id));
        }
        let mut parent = None;
        for name in split_path(path) {
            let id = self
                .repo
                .find_or_create(name, &category_slug(name), parent)
                .await?;
            parent = Some(id);
        }
        if let Some(leaf) = parent {
            self.cache.insert(path.to_string(), leaf);
        }
        Ok(parent)
    }
}
