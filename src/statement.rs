//! # Compiled Statements
//!
//! The SQL compiler that turns logical requests into statement text lives
//! outside this crate. What reaches the command factory is a [`SqlTemplate`]:
//! statement text with holes the factory decides how to fill.
//!
//! ```text
//! SELECT id, name FROM {schema:main}.customer
//! WHERE [branch #3: name = {#3} | name IS NULL]
//!   AND id IN {filter #4 over (id)}
//! LIMIT {#5}
//! ```
//!
//! The factory never edits text. It fills a [`PostCompilerConfiguration`]:
//!
//! - **placeholder values**: parameter references (`@p0_1`) or inlined literals
//! - **alternative branches**: bindings whose alternative text should be used
//! - **dynamic filter values**: the 2-D grid of parameter references for row
//!   filters
//! - **schema mapping**: database/schema name overrides
//!
//! and asks the template to render itself against it.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::parameter::BindingId;

// =============================================================================
// Post-Compiler Configuration
// =============================================================================

/// Decisions the command factory made about each binding of one statement.
#[derive(Debug, Clone, Default)]
pub struct PostCompilerConfiguration {
    /// Bindings whose alternative branch is active.
    pub alternative_branches: HashSet<BindingId>,
    /// Text substituted for each placeholder.
    pub placeholder_values: HashMap<BindingId, String>,
    /// Parameter references for each row-filter binding, one inner list per row.
    pub dynamic_filter_values: HashMap<BindingId, Vec<Vec<String>>>,
    /// Schema name overrides.
    pub schema_mapping: HashMap<String, String>,
}

// =============================================================================
// Template
// =============================================================================

/// One piece of a compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal SQL text.
    Text(String),
    /// Replaced by the binding's placeholder value.
    Placeholder(BindingId),
    /// `main` normally, `alternative` when the binding's branch is active.
    Branch {
        binding: BindingId,
        main: Vec<Segment>,
        alternative: Vec<Segment>,
    },
    /// `(columns) IN ((refs), ...)` over the binding's dynamic filter values.
    RowFilter {
        binding: BindingId,
        columns: Vec<String>,
    },
    /// A schema name, subject to the schema mapping.
    Schema(String),
}

/// A compiled statement awaiting post-compilation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlTemplate {
    segments: Vec<Segment>,
}

impl SqlTemplate {
    /// Starts building a template.
    ///
    /// # Example
    ///
    /// ```rust
    /// use spiteorm::statement::{PostCompilerConfiguration, SqlTemplate};
    /// use spiteorm::BindingId;
    ///
    /// let id = BindingId::next();
    /// let template = SqlTemplate::builder()
    ///     .text("SELECT name FROM customer WHERE ")
    ///     .branch(
    ///         id,
    ///         SqlTemplate::builder().text("name = ").placeholder(id).build(),
    ///         SqlTemplate::builder().text("name IS NULL").build(),
    ///     )
    ///     .build();
    ///
    /// let mut config = PostCompilerConfiguration::default();
    /// config.alternative_branches.insert(id);
    /// assert_eq!(
    ///     template.render(&config).unwrap(),
    ///     "SELECT name FROM customer WHERE name IS NULL"
    /// );
    /// ```
    pub fn builder() -> TemplateBuilder {
        TemplateBuilder::default()
    }

    /// A template that is plain text.
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment::Text(sql.into())],
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Produces final statement text.
    ///
    /// # Errors
    ///
    /// `Error::InvalidOperation` if a reached placeholder or row filter has
    /// no value. Placeholders inside inactive branches are never reached.
    pub fn render(&self, configuration: &PostCompilerConfiguration) -> Result<String> {
        let mut out = String::new();
        render_segments(&self.segments, configuration, &mut out)?;
        Ok(out)
    }
}

fn render_segments(
    segments: &[Segment],
    configuration: &PostCompilerConfiguration,
    out: &mut String,
) -> Result<()> {
    for segment in segments {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Placeholder(binding) => {
                let value = configuration.placeholder_values.get(binding).ok_or_else(|| {
                    Error::InvalidOperation(format!("placeholder {binding} has no value"))
                })?;
                out.push_str(value);
            }
            Segment::Branch {
                binding,
                main,
                alternative,
            } => {
                if configuration.alternative_branches.contains(binding) {
                    render_segments(alternative, configuration, out)?;
                } else {
                    render_segments(main, configuration, out)?;
                }
            }
            Segment::RowFilter { binding, columns } => {
                let rows = configuration.dynamic_filter_values.get(binding).ok_or_else(|| {
                    Error::InvalidOperation(format!("row filter {binding} has no values"))
                })?;
                if rows.is_empty() {
                    // An empty IN-list matches nothing.
                    out.push_str("1 = 0");
                    continue;
                }
                out.push('(');
                out.push_str(&columns.join(", "));
                out.push_str(") IN (");
                let rendered: Vec<String> = rows
                    .iter()
                    .map(|row| format!("({})", row.join(", ")))
                    .collect();
                out.push_str(&rendered.join(", "));
                out.push(')');
            }
            Segment::Schema(name) => {
                let mapped = configuration.schema_mapping.get(name).unwrap_or(name);
                out.push_str(mapped);
            }
        }
    }
    Ok(())
}

/// Builder for [`SqlTemplate`].
#[derive(Debug, Default)]
pub struct TemplateBuilder {
    segments: Vec<Segment>,
}

impl TemplateBuilder {
    pub fn text(mut self, sql: impl Into<String>) -> Self {
        self.segments.push(Segment::Text(sql.into()));
        self
    }

    pub fn placeholder(mut self, binding: BindingId) -> Self {
        self.segments.push(Segment::Placeholder(binding));
        self
    }

    pub fn branch(mut self, binding: BindingId, main: SqlTemplate, alternative: SqlTemplate) -> Self {
        self.segments.push(Segment::Branch {
            binding,
            main: main.segments,
            alternative: alternative.segments,
        });
        self
    }

    pub fn row_filter<S: Into<String>>(
        mut self,
        binding: BindingId,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.segments.push(Segment::RowFilter {
            binding,
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn schema(mut self, name: impl Into<String>) -> Self {
        self.segments.push(Segment::Schema(name.into()));
        self
    }

    pub fn build(self) -> SqlTemplate {
        SqlTemplate {
            segments: self.segments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_without_value_fails() {
        let id = BindingId::next();
        let template = SqlTemplate::builder().text("LIMIT ").placeholder(id).build();

        let err = template.render(&PostCompilerConfiguration::default()).unwrap_err();
        assert!(err.is_misuse());

        let mut config = PostCompilerConfiguration::default();
        config.placeholder_values.insert(id, "10".to_string());
        assert_eq!(template.render(&config).unwrap(), "LIMIT 10");
    }

    #[test]
    fn test_inactive_branch_placeholders_are_not_required() {
        let id = BindingId::next();
        let template = SqlTemplate::builder()
            .branch(
                id,
                SqlTemplate::builder().text("x = ").placeholder(id).build(),
                SqlTemplate::text("x IS NULL"),
            )
            .build();

        let mut config = PostCompilerConfiguration::default();
        config.alternative_branches.insert(id);
        assert_eq!(template.render(&config).unwrap(), "x IS NULL");
    }

    #[test]
    fn test_row_filter_rendering() {
        let id = BindingId::next();
        let template = SqlTemplate::builder()
            .text("WHERE ")
            .row_filter(id, ["a", "b"])
            .build();

        let mut config = PostCompilerConfiguration::default();
        config.dynamic_filter_values.insert(
            id,
            vec![
                vec!["@p_0_0".to_string(), "@p_0_1".to_string()],
                vec!["@p_1_0".to_string(), "@p_1_1".to_string()],
            ],
        );
        assert_eq!(
            template.render(&config).unwrap(),
            "WHERE (a, b) IN ((@p_0_0, @p_0_1), (@p_1_0, @p_1_1))"
        );

        config.dynamic_filter_values.insert(id, Vec::new());
        assert_eq!(template.render(&config).unwrap(), "WHERE 1 = 0");
    }

    #[test]
    fn test_schema_mapping_override() {
        let template = SqlTemplate::builder()
            .text("SELECT 1 FROM ")
            .schema("main")
            .text(".t")
            .build();

        let mut config = PostCompilerConfiguration::default();
        assert_eq!(template.render(&config).unwrap(), "SELECT 1 FROM main.t");

        config.schema_mapping.insert("main".into(), "tenant_a".into());
        assert_eq!(template.render(&config).unwrap(), "SELECT 1 FROM tenant_a.t");
    }
}
