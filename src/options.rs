//! Reader configuration

/// Options controlling XML tokenization and value coercion
///
/// Defaults match what most workbooks need: strict XML, trimmed text and
/// number formats applied to numeric cells.
///
/// # Example
///
/// ```
/// use xlsxstream::ReaderOptions;
///
/// let options = ReaderOptions::default().with_formatting(false).with_trim(false);
/// assert!(!options.formatting);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReaderOptions {
    /// Reject mismatched end tags
    pub strict: bool,
    /// Trim surrounding whitespace from text nodes, dropping empty ones
    pub trim: bool,
    /// Only accept the five predefined XML entities plus character references
    pub strict_entities: bool,
    /// Collapse whitespace runs inside text nodes to a single space
    pub normalize: bool,
    /// Log non-fatal diagnostics such as missing shared strings
    pub verbose: bool,
    /// Coerce numeric cells through their resolved number format
    pub formatting: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            strict: true,
            trim: true,
            strict_entities: true,
            normalize: false,
            verbose: true,
            formatting: true,
        }
    }
}

impl ReaderOptions {
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    pub fn with_strict_entities(mut self, strict_entities: bool) -> Self {
        self.strict_entities = strict_entities;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_formatting(mut self, formatting: bool) -> Self {
        self.formatting = formatting;
        self
    }

    /// Defaults overridden by `XLSXSTREAM_*` environment variables
    ///
    /// Recognized: `XLSXSTREAM_STRICT`, `XLSXSTREAM_TRIM`,
    /// `XLSXSTREAM_STRICT_ENTITIES`, `XLSXSTREAM_NORMALIZE`,
    /// `XLSXSTREAM_VERBOSE`, `XLSXSTREAM_FORMATTING`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str, fallback: bool| {
            lookup(key)
                .and_then(|value| parse_flag(&value))
                .unwrap_or(fallback)
        };

        let defaults = ReaderOptions::default();
        ReaderOptions {
            strict: flag("XLSXSTREAM_STRICT", defaults.strict),
            trim: flag("XLSXSTREAM_TRIM", defaults.trim),
            strict_entities: flag("XLSXSTREAM_STRICT_ENTITIES", defaults.strict_entities),
            normalize: flag("XLSXSTREAM_NORMALIZE", defaults.normalize),
            verbose: flag("XLSXSTREAM_VERBOSE", defaults.verbose),
            formatting: flag("XLSXSTREAM_FORMATTING", defaults.formatting),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
