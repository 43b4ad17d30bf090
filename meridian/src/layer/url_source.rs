use std::collections::HashMap;

use meridian_types::TileCoordinate;

use crate::error::TileError;

/// Resolves the URL of a tile.
///
/// Any `Fn(&TileCoordinate) -> String` closure is a url source. The result must only depend
/// on the argument: the layer uses the URL to name the tile in the cache.
pub trait UrlSource<Key: ?Sized>: (Fn(&Key) -> String) + Send + Sync {}
impl<Key: ?Sized, T: Fn(&Key) -> String> UrlSource<Key> for T where T: Send + Sync {}

/// URL pattern with `{z}`, `{x}` and `{y}` placeholders.
///
/// A `{s}` placeholder can be used for servers that spread tiles over several subdomains. The
/// subdomain for a tile is always the same, so that a tile is never cached twice.
///
/// ```
/// use meridian::layer::UrlTemplate;
/// use meridian_types::TileCoordinate;
///
/// let template = UrlTemplate::with_subdomains(
///     "https://{s}.tile.example.com/{z}/{x}/{y}.png",
///     ["a", "b", "c"],
/// )?;
/// assert_eq!(
///     template.url(&TileCoordinate::new(3, 1, 2)),
///     "https://a.tile.example.com/3/1/2.png"
/// );
/// # Ok::<(), meridian::error::TileError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    template: String,
    subdomains: Vec<String>,
}

impl UrlTemplate {
    /// Creates a template, checking that it contains all of the `{z}`, `{x}` and `{y}`
    /// placeholders and no unknown ones.
    ///
    /// Templates with the `{s}` placeholder must be created with
    /// [`UrlTemplate::with_subdomains`].
    pub fn new(template: impl Into<String>) -> Result<Self, TileError> {
        Self::with_subdomains(template, Vec::<String>::new())
    }

    /// Creates a template with a `{s}` placeholder that is replaced by one of the
    /// `subdomains`.
    ///
    /// Returns an error if the template has a `{s}` placeholder but the list is empty, or the
    /// list is given for a template without the placeholder.
    pub fn with_subdomains<S: Into<String>>(
        template: impl Into<String>,
        subdomains: impl IntoIterator<Item = S>,
    ) -> Result<Self, TileError> {
        let template = template.into();
        for placeholder in ["{z}", "{x}", "{y}"] {
            if !template.contains(placeholder) {
                return Err(TileError::Configuration(format!(
                    "url template {template:?} has no {placeholder} placeholder"
                )));
            }
        }

        let subdomains: Vec<String> = subdomains.into_iter().map(Into::into).collect();
        match (template.contains("{s}"), subdomains.is_empty()) {
            (true, true) => {
                return Err(TileError::Configuration(format!(
                    "url template {template:?} requires a list of subdomains"
                )))
            }
            (false, false) => {
                return Err(TileError::Configuration(format!(
                    "url template {template:?} has no {{s}} placeholder for subdomains"
                )))
            }
            _ => {}
        }

        let this = Self {
            template,
            subdomains,
        };
        this.validate()?;
        Ok(this)
    }

    /// Template of OpenStreetMap standard tiles.
    pub fn osm() -> Self {
        Self {
            template: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_owned(),
            subdomains: vec![],
        }
    }

    /// The template string.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Resolves the URL of the tile.
    pub fn url(&self, coordinate: &TileCoordinate) -> String {
        match self.format(coordinate) {
            Ok(url) => url,
            Err(err) => {
                // Unreachable for validated templates.
                log::error!("Failed to format url template {:?}: {err}", self.template);
                String::new()
            }
        }
    }

    fn format(&self, coordinate: &TileCoordinate) -> Result<String, strfmt::FmtError> {
        let mut vars = HashMap::with_capacity(4);
        vars.insert("z".to_owned(), coordinate.zoom.to_string());
        vars.insert("x".to_owned(), coordinate.x.to_string());
        vars.insert("y".to_owned(), coordinate.y.to_string());
        if !self.subdomains.is_empty() {
            let index = (coordinate.x as i64 + coordinate.y as i64)
                .rem_euclid(self.subdomains.len() as i64) as usize;
            vars.insert("s".to_owned(), self.subdomains[index].clone());
        }

        strfmt::strfmt(&self.template, &vars)
    }

    fn validate(&self) -> Result<(), TileError> {
        self.format(&TileCoordinate::default())
            .map(|_| ())
            .map_err(|err| {
                TileError::Configuration(format!("invalid url template {:?}: {err}", self.template))
            })
    }

    /// Converts the template into a url source for a layer.
    pub fn into_url_source(self) -> impl UrlSource<TileCoordinate> {
        move |coordinate: &TileCoordinate| self.url(coordinate)
    }
}
