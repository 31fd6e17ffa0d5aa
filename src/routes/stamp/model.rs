use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};

static DIMENSIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\s*[x×]\s*\d+").expect("dimensions pattern is valid"));

/// Row of one of the reference tables (conditions, countries, colors).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Lookup {
    pub id: i64,
    pub name: String,
}

impl Lookup {
    pub async fn conditions(pool: &SqlitePool) -> Result<Vec<Lookup>, sqlx::Error> {
        sqlx::query_as::<_, Lookup>("SELECT id, name FROM stamp_conditions ORDER BY id")
            .fetch_all(pool)
            .await
    }

    pub async fn countries(pool: &SqlitePool) -> Result<Vec<Lookup>, sqlx::Error> {
        sqlx::query_as::<_, Lookup>("SELECT id, name FROM stamp_countries ORDER BY name")
            .fetch_all(pool)
            .await
    }

    pub async fn colors(pool: &SqlitePool) -> Result<Vec<Lookup>, sqlx::Error> {
        sqlx::query_as::<_, Lookup>("SELECT id, name FROM stamp_colors ORDER BY name")
            .fetch_all(pool)
            .await
    }
}

/// The three dropdown sets used by the stamp forms and the catalogue filters.
pub struct Lookups {
    pub conditions: Vec<Lookup>,
    pub countries: Vec<Lookup>,
    pub colors: Vec<Lookup>,
}

impl Lookups {
    pub async fn load(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        Ok(Self {
            conditions: Lookup::conditions(pool).await?,
            countries: Lookup::countries(pool).await?,
            colors: Lookup::colors(pool).await?,
        })
    }
}

/// A stamp with its lookup labels, as shown on the detail page.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StampDetail {
    pub id: i64,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub condition_id: Option<i64>,
    pub condition: Option<String>,
    pub country_id: Option<i64>,
    pub country: Option<String>,
    pub color_id: Option<i64>,
    pub color: Option<String>,
    pub print_run: Option<i64>,
    pub certified: bool,
    pub dimensions: Option<String>,
    pub description: Option<String>,
    pub owner_id: i64,
    pub owner_username: Option<String>,
    pub primary_image_id: Option<i64>,
}

/// Catalogue row: labels, owner and cover image path.
#[derive(Debug, Clone, FromRow)]
pub struct StampSummary {
    pub id: i64,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub certified: bool,
    pub condition: Option<String>,
    pub country: Option<String>,
    pub color: Option<String>,
    pub owner_username: Option<String>,
    pub primary_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StampImage {
    pub id: i64,
    pub stamp_id: i64,
    pub path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    DateDesc,
    DateAsc,
    NameAsc,
    NameDesc,
}

impl SortOrder {
    pub const ALL: [SortOrder; 4] = [
        SortOrder::DateDesc,
        SortOrder::DateAsc,
        SortOrder::NameAsc,
        SortOrder::NameDesc,
    ];

    /// Unknown keys fall back to newest first.
    pub fn parse(key: &str) -> Self {
        match key {
            "date_asc" => SortOrder::DateAsc,
            "nom_asc" => SortOrder::NameAsc,
            "nom_desc" => SortOrder::NameDesc,
            _ => SortOrder::DateDesc,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::DateDesc => "date_desc",
            SortOrder::DateAsc => "date_asc",
            SortOrder::NameAsc => "nom_asc",
            SortOrder::NameDesc => "nom_desc",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortOrder::DateDesc => "Plus récents",
            SortOrder::DateAsc => "Plus anciens",
            SortOrder::NameAsc => "Nom (A-Z)",
            SortOrder::NameDesc => "Nom (Z-A)",
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            SortOrder::DateDesc => "s.created_at DESC, s.id DESC",
            SortOrder::DateAsc => "s.created_at ASC, s.id ASC",
            SortOrder::NameAsc => "s.name ASC, s.id ASC",
            SortOrder::NameDesc => "s.name DESC, s.id DESC",
        }
    }
}

/// Raw catalogue query string. Every value is kept as text so a malformed
/// parameter is ignored instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub pays_id: Option<String>,
    pub couleur_id: Option<String>,
    pub condition_id: Option<String>,
    pub certifie: Option<String>,
    pub sort: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StampFilters {
    pub search: Option<String>,
    pub country_id: Option<i64>,
    pub color_id: Option<i64>,
    pub condition_id: Option<i64>,
    pub certified_only: bool,
    pub sort: SortOrder,
}

impl ListQuery {
    pub fn filters(&self) -> StampFilters {
        StampFilters {
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            country_id: parse_id(self.pays_id.as_deref()),
            color_id: parse_id(self.couleur_id.as_deref()),
            condition_id: parse_id(self.condition_id.as_deref()),
            certified_only: self.certifie.is_some(),
            sort: SortOrder::parse(self.sort.as_deref().unwrap_or_default()),
        }
    }

    /// Requested page, never below 1.
    pub fn page(&self) -> i64 {
        self.page
            .as_deref()
            .and_then(|p| p.trim().parse::<i64>().ok())
            .unwrap_or(1)
            .max(1)
    }
}

impl StampFilters {
    /// Query-string pairs reproducing these filters, for pagination links.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(search) = &self.search {
            pairs.push(("search", search.clone()));
        }
        if let Some(id) = self.country_id {
            pairs.push(("pays_id", id.to_string()));
        }
        if let Some(id) = self.color_id {
            pairs.push(("couleur_id", id.to_string()));
        }
        if let Some(id) = self.condition_id {
            pairs.push(("condition_id", id.to_string()));
        }
        if self.certified_only {
            pairs.push(("certifie", "1".to_string()));
        }
        pairs.push(("sort", self.sort.as_str().to_string()));
        pairs
    }

    fn push_where(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push(" WHERE 1 = 1");
        if let Some(search) = &self.search {
            builder
                .push(" AND s.name LIKE ")
                .push_bind(format!("%{}%", search));
        }
        if let Some(id) = self.country_id {
            builder.push(" AND s.country_id = ").push_bind(id);
        }
        if let Some(id) = self.color_id {
            builder.push(" AND s.color_id = ").push_bind(id);
        }
        if let Some(id) = self.condition_id {
            builder.push(" AND s.condition_id = ").push_bind(id);
        }
        if self.certified_only {
            builder.push(" AND s.certified = 1");
        }
    }
}

fn parse_id(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.trim().parse::<i64>().ok())
}

/// Stamp form fields as submitted, urlencoded or multipart.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StampForm {
    #[serde(default)]
    pub nom: String,
    #[serde(default)]
    pub condition_id: String,
    #[serde(default)]
    pub tirage: String,
    pub certifie: Option<String>,
    #[serde(default)]
    pub dimensions: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pays_id: String,
    #[serde(default)]
    pub couleur_id: String,
}

/// Validated stamp fields ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct StampInput {
    pub name: String,
    pub condition_id: Option<i64>,
    pub country_id: Option<i64>,
    pub color_id: Option<i64>,
    pub print_run: Option<i64>,
    pub certified: bool,
    pub dimensions: Option<String>,
    pub description: Option<String>,
}

impl StampForm {
    /// Assigns a multipart text field by name. Unknown names are ignored.
    pub fn set(&mut self, name: &str, value: String) {
        match name {
            "nom" => self.nom = value,
            "condition_id" => self.condition_id = value,
            "tirage" => self.tirage = value,
            "certifie" => self.certifie = Some(value),
            "dimensions" => self.dimensions = value,
            "description" => self.description = value,
            "pays_id" => self.pays_id = value,
            "couleur_id" => self.couleur_id = value,
            _ => {}
        }
    }

    pub fn condition(&self) -> Option<i64> {
        parse_id(Some(&self.condition_id))
    }

    pub fn country(&self) -> Option<i64> {
        parse_id(Some(&self.pays_id))
    }

    pub fn color(&self) -> Option<i64> {
        parse_id(Some(&self.couleur_id))
    }

    pub fn validate(&self) -> Result<StampInput, Vec<String>> {
        let mut errors = Vec::new();

        let name = self.nom.trim();
        if name.is_empty() {
            errors.push("Le nom du timbre est obligatoire.".to_string());
        }

        let print_run = match self.tirage.trim() {
            "" => None,
            raw => match raw.parse::<f64>() {
                Ok(n) if n.is_finite() && n >= 0.0 => Some(n.trunc() as i64),
                _ => {
                    errors.push("Le tirage doit être un nombre positif.".to_string());
                    None
                }
            },
        };

        if !self.dimensions.is_empty() && !DIMENSIONS_RE.is_match(&self.dimensions) {
            errors.push(
                "Format attendu pour les dimensions : largeur x hauteur (ex: 25 x 30).".to_string(),
            );
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(StampInput {
            name: name.to_string(),
            condition_id: self.condition(),
            country_id: self.country(),
            color_id: self.color(),
            print_run,
            certified: self.certifie.is_some(),
            dimensions: non_empty(&self.dimensions),
            description: non_empty(&self.description),
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

const SUMMARY_SELECT: &str = r#"
    SELECT s.id, s.name, s.created_at, s.certified,
           c.name AS condition, p.name AS country, co.name AS color,
           u.username AS owner_username, i.path AS primary_image
    FROM stamps s
    LEFT JOIN stamp_conditions c ON c.id = s.condition_id
    LEFT JOIN stamp_countries p ON p.id = s.country_id
    LEFT JOIN stamp_colors co ON co.id = s.color_id
    LEFT JOIN users u ON u.id = s.owner_id
    LEFT JOIN stamp_images i ON i.id = s.primary_image_id
"#;

impl StampInput {
    pub async fn insert(&self, pool: &SqlitePool, owner_id: i64) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO stamps
                (name, created_at, condition_id, country_id, color_id, print_run,
                 certified, dimensions, description, owner_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.name)
        .bind(chrono::Utc::now().naive_utc())
        .bind(self.condition_id)
        .bind(self.country_id)
        .bind(self.color_id)
        .bind(self.print_run)
        .bind(self.certified)
        .bind(&self.dimensions)
        .bind(&self.description)
        .bind(owner_id)
        .execute(pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn update(&self, pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE stamps
            SET name = ?, condition_id = ?, country_id = ?, color_id = ?,
                print_run = ?, certified = ?, dimensions = ?, description = ?
            WHERE id = ?
            "#,
        )
        .bind(&self.name)
        .bind(self.condition_id)
        .bind(self.country_id)
        .bind(self.color_id)
        .bind(self.print_run)
        .bind(self.certified)
        .bind(&self.dimensions)
        .bind(&self.description)
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }
}

impl StampDetail {
    pub async fn find(pool: &SqlitePool, id: i64) -> Result<Option<StampDetail>, sqlx::Error> {
        sqlx::query_as::<_, StampDetail>(
            r#"
            SELECT s.id, s.name, s.created_at,
                   s.condition_id, c.name AS condition,
                   s.country_id, p.name AS country,
                   s.color_id, co.name AS color,
                   s.print_run, s.certified, s.dimensions, s.description,
                   s.owner_id, u.username AS owner_username, s.primary_image_id
            FROM stamps s
            LEFT JOIN stamp_conditions c ON c.id = s.condition_id
            LEFT JOIN stamp_countries p ON p.id = s.country_id
            LEFT JOIN stamp_colors co ON co.id = s.color_id
            LEFT JOIN users u ON u.id = s.owner_id
            WHERE s.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn owner_of(pool: &SqlitePool, id: i64) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar("SELECT owner_id FROM stamps WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Removes the stamp and its image rows in one transaction and returns the
    /// paths of the images that were attached. Files are left to the caller.
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<Vec<String>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let paths: Vec<String> =
            sqlx::query_scalar("SELECT path FROM stamp_images WHERE stamp_id = ? ORDER BY id")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM stamp_images WHERE stamp_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM stamps WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(paths)
    }
}

impl StampSummary {
    pub async fn list(
        pool: &SqlitePool,
        filters: &StampFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<StampSummary>, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new(SUMMARY_SELECT);
        filters.push_where(&mut builder);
        builder
            .push(" ORDER BY ")
            .push(filters.sort.order_by())
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        builder
            .build_query_as::<StampSummary>()
            .fetch_all(pool)
            .await
    }

    pub async fn count(pool: &SqlitePool, filters: &StampFilters) -> Result<i64, sqlx::Error> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM stamps s");
        filters.push_where(&mut builder);
        builder.build_query_scalar::<i64>().fetch_one(pool).await
    }
}

impl StampImage {
    /// Images of a stamp, oldest first.
    pub async fn for_stamp(pool: &SqlitePool, stamp_id: i64) -> Result<Vec<StampImage>, sqlx::Error> {
        sqlx::query_as::<_, StampImage>(
            "SELECT id, stamp_id, path FROM stamp_images WHERE stamp_id = ? ORDER BY id",
        )
        .bind(stamp_id)
        .fetch_all(pool)
        .await
    }

    pub async fn add(pool: &SqlitePool, stamp_id: i64, path: &str) -> Result<i64, sqlx::Error> {
        let result = sqlx::query("INSERT INTO stamp_images (stamp_id, path) VALUES (?, ?)")
            .bind(stamp_id)
            .bind(path)
            .execute(pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Makes the image the stamp's cover unless it already has one. Returns
    /// whether the cover changed.
    pub async fn set_primary_if_none(
        pool: &SqlitePool,
        stamp_id: i64,
        image_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE stamps SET primary_image_id = ? WHERE id = ? AND primary_image_id IS NULL",
        )
        .bind(image_id)
        .bind(stamp_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes one image of a stamp and returns its stored path, or `None` when
    /// the image does not belong to that stamp. A removed cover is replaced by
    /// the oldest remaining image.
    pub async fn delete(
        pool: &SqlitePool,
        stamp_id: i64,
        image_id: i64,
    ) -> Result<Option<String>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let path: Option<String> =
            sqlx::query_scalar("SELECT path FROM stamp_images WHERE id = ? AND stamp_id = ?")
                .bind(image_id)
                .bind(stamp_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(path) = path else {
            return Ok(None);
        };

        sqlx::query("UPDATE stamps SET primary_image_id = NULL WHERE id = ? AND primary_image_id = ?")
            .bind(stamp_id)
            .bind(image_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM stamp_images WHERE id = ?")
            .bind(image_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE stamps
            SET primary_image_id = (
                SELECT id FROM stamp_images WHERE stamp_id = ? ORDER BY id LIMIT 1
            )
            WHERE id = ? AND primary_image_id IS NULL
            "#,
        )
        .bind(stamp_id)
        .bind(stamp_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(nom: &str, tirage: &str, dimensions: &str) -> StampForm {
        StampForm {
            nom: nom.into(),
            tirage: tirage.into(),
            dimensions: dimensions.into(),
            ..StampForm::default()
        }
    }

    #[test]
    fn name_is_required() {
        let errors = form("   ", "", "").validate().unwrap_err();
        assert_eq!(errors, vec!["Le nom du timbre est obligatoire.".to_string()]);
    }

    #[test]
    fn negative_print_run_is_rejected() {
        let errors = form("Bluenose", "-1", "").validate().unwrap_err();
        assert_eq!(errors, vec!["Le tirage doit être un nombre positif.".to_string()]);
    }

    #[test]
    fn non_numeric_print_run_is_rejected() {
        assert!(form("Bluenose", "beaucoup", "").validate().is_err());
    }

    #[test]
    fn print_run_is_truncated() {
        let input = form("Bluenose", "1500.9", "").validate().unwrap();
        assert_eq!(input.print_run, Some(1500));

        let zero = form("Bluenose", "0", "").validate().unwrap();
        assert_eq!(zero.print_run, Some(0));

        let blank = form("Bluenose", "", "").validate().unwrap();
        assert_eq!(blank.print_run, None);
    }

    #[test]
    fn dimensions_need_a_width_and_height_prefix() {
        for ok in ["25 x 30", "25x30", "25 × 30 mm", "40 x 24,5"] {
            assert!(form("Bluenose", "", ok).validate().is_ok(), "{ok}");
        }
        for bad in ["25", "x 30", "vingt x trente", " 25 x 30"] {
            assert!(form("Bluenose", "", bad).validate().is_err(), "{bad}");
        }
    }

    #[test]
    fn all_errors_are_collected() {
        let errors = form("", "-3", "abc").validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn optional_fields_are_normalized() {
        let mut submitted = form("  Bluenose ", "", "");
        submitted.set("pays_id", "1".into());
        submitted.set("couleur_id", "".into());
        submitted.set("condition_id", "abc".into());
        submitted.set("description", "  ".into());
        submitted.set("certifie", "on".into());
        submitted.set("inconnu", "ignored".into());

        let input = submitted.validate().unwrap();
        assert_eq!(input.name, "Bluenose");
        assert_eq!(input.country_id, Some(1));
        assert_eq!(input.color_id, None);
        assert_eq!(input.condition_id, None);
        assert_eq!(input.description, None);
        assert!(input.certified);
    }

    #[test]
    fn list_query_is_lenient() {
        let query = ListQuery {
            search: Some("  ".into()),
            pays_id: Some("x".into()),
            couleur_id: Some("3".into()),
            certifie: Some(String::new()),
            sort: Some("nonsense".into()),
            page: Some("-4".into()),
            ..ListQuery::default()
        };
        let filters = query.filters();
        assert_eq!(filters.search, None);
        assert_eq!(filters.country_id, None);
        assert_eq!(filters.color_id, Some(3));
        assert!(filters.certified_only);
        assert_eq!(filters.sort, SortOrder::DateDesc);
        assert_eq!(query.page(), 1);
    }

    #[test]
    fn sort_keys_round_trip() {
        for sort in SortOrder::ALL {
            assert_eq!(SortOrder::parse(sort.as_str()), sort);
        }
    }

    #[test]
    fn filters_are_carried_into_pagination_links() {
        let filters = StampFilters {
            search: Some("nez".into()),
            color_id: Some(2),
            certified_only: true,
            sort: SortOrder::NameAsc,
            ..StampFilters::default()
        };
        let query = serde_urlencoded::to_string(filters.query_pairs()).unwrap();
        assert_eq!(query, "search=nez&couleur_id=2&certifie=1&sort=nom_asc");
    }
}
