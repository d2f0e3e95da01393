//! Query modifiers: filtering, sorting, sparse fieldsets and inclusion of
//! related resources, per the JSON:API fetching conventions.
//!
//! Modifiers compose with [`QueryModifier::and`]; the combined modifier
//! `&`-joins the individual query fragments in left-to-right order:
//!
//! ```
//! use jsonapi_client::modifiers::{Filter, Include, QueryModifier, Sort};
//!
//! let modifier = Filter::new("").field("author", "frank")
//!     .and(Include::new(["comments"]))
//!     .and(Sort::new(["-created"]));
//! assert_eq!(
//!     modifier.url_with_modifiers("http://example.com/articles"),
//!     "http://example.com/articles?filter[author]=frank&include=comments&sort=-created",
//! );
//! ```

use crate::names::wire_name;

/// A URL query fragment that narrows a server response.
pub trait QueryModifier {
    /// The query-string fragment this modifier contributes, without a
    /// leading `?` or `&`.
    fn appended_query(&self) -> String;

    /// Append this modifier's query to a base URL.
    fn url_with_modifiers(&self, base_url: &str) -> String {
        format!("{base_url}?{}", self.appended_query())
    }

    /// Combine two modifiers into a [`ModifierSum`].
    ///
    /// Composition is associative: `a.and(b).and(c)` and `a.and(b.and(c))`
    /// render the same query string.
    fn and<M>(self, other: M) -> ModifierSum
    where
        Self: Sized + 'static,
        M: QueryModifier + 'static,
    {
        ModifierSum {
            modifiers: vec![Box::new(self), Box::new(other)],
        }
    }
}

/// A fully manual query fragment, passed to the server as-is.
#[derive(Debug, Clone)]
pub struct Modifier {
    query: String,
}

impl Modifier {
    /// Wrap a raw query string.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Modifier {
        Modifier {
            query: query.into(),
        }
    }
}

impl QueryModifier for Modifier {
    fn appended_query(&self) -> String {
        self.query.clone()
    }
}

/// An ordered sequence of modifiers whose fragments are `&`-joined.
pub struct ModifierSum {
    modifiers: Vec<Box<dyn QueryModifier>>,
}

impl ModifierSum {
    /// Append another modifier to the sum.
    #[must_use]
    pub fn and<M>(mut self, other: M) -> ModifierSum
    where
        M: QueryModifier + 'static,
    {
        self.modifiers.push(Box::new(other));
        self
    }
}

impl QueryModifier for ModifierSum {
    fn appended_query(&self) -> String {
        self.modifiers
            .iter()
            .map(|modifier| modifier.appended_query())
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// A value usable in a [`Filter`] or [`SparseFieldset`] field.
///
/// Scalars render with their `Display` form; sequences are comma-joined.
pub trait FilterArgument {
    /// Render the value for use in a query string.
    fn to_query_value(&self) -> String;
}

macro_rules! display_filter_argument {
    ($($ty:ty),*) => {
        $(
            impl FilterArgument for $ty {
                fn to_query_value(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

display_filter_argument!(&str, String, i64, u64, i32, u32, f64, bool);

impl<T: FilterArgument> FilterArgument for &[T] {
    fn to_query_value(&self) -> String {
        self.iter()
            .map(FilterArgument::to_query_value)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl<T: FilterArgument> FilterArgument for Vec<T> {
    fn to_query_value(&self) -> String {
        self.as_slice().to_query_value()
    }
}

impl<T: FilterArgument, const N: usize> FilterArgument for [T; N] {
    fn to_query_value(&self) -> String {
        self.as_slice().to_query_value()
    }
}

/// Bracket-keyed parameters shared by [`Filter`] and [`SparseFieldset`].
#[derive(Debug, Clone)]
struct KeyedParams {
    keyword: &'static str,
    /// Parameters parsed from the raw query string, in first-seen order.
    /// A repeated key overwrites the value but keeps its position.
    raw: Vec<(String, String)>,
    /// Parameters added through the builder, in first-seen order; a repeated
    /// name replaces the previous value.
    named: Vec<(String, String)>,
}

impl KeyedParams {
    fn new(keyword: &'static str, query_str: &str) -> KeyedParams {
        let mut raw: Vec<(String, String)> = Vec::new();
        for param in query_str.split('&').filter(|param| !param.is_empty()) {
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            if let Some(entry) = raw.iter_mut().find(|(existing, _)| existing == key) {
                entry.1 = value.to_owned();
            } else {
                raw.push((key.to_owned(), value.to_owned()));
            }
        }
        KeyedParams {
            keyword,
            raw,
            named: Vec::new(),
        }
    }

    fn field(&mut self, name: &str, value: &dyn FilterArgument) {
        let name = wire_name(name);
        let value = value.to_query_value();
        if let Some(entry) = self.named.iter_mut().find(|(existing, _)| *existing == name) {
            entry.1 = value;
        } else {
            self.named.push((name, value));
        }
    }

    fn render(&self) -> String {
        let mut params = self.raw.clone();
        for (name, value) in &self.named {
            let key = format!("{}[{name}]", self.keyword);
            if let Some(entry) = params.iter_mut().find(|(existing, _)| *existing == key) {
                // A key known from the raw query string gets the named value
                // appended with a comma.
                entry.1 = format!("{},{value}", entry.1);
            } else {
                params.push((key, value.clone()));
            }
        }
        params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Result filtering, per the JSON:API filtering recommendation
/// (`filter[name]=value`).
///
/// Field names pass through [`wire_name`](crate::names::wire_name), so
/// `rel1__arg1` addresses the nested `rel1.arg1`.
#[derive(Debug, Clone)]
pub struct Filter {
    params: KeyedParams,
}

impl Filter {
    /// Create a filter, optionally seeded from a raw query string such as
    /// `"filter[attr1]=1,2&filter[attr2]=3"`.
    #[must_use]
    pub fn new(query_str: &str) -> Filter {
        Filter {
            params: KeyedParams::new("filter", query_str),
        }
    }

    /// Add a named filter field. A value for a key already present in the
    /// raw query string is comma-appended to it; repeating a name here
    /// replaces the earlier value.
    #[must_use]
    pub fn field(mut self, name: &str, value: impl FilterArgument) -> Filter {
        self.params.field(name, &value);
        self
    }
}

impl QueryModifier for Filter {
    fn appended_query(&self) -> String {
        self.params.render()
    }
}

/// Sparse fieldsets (`fields[type]=attr1,attr2`); same mechanics as
/// [`Filter`] with the `fields` keyword.
#[derive(Debug, Clone)]
pub struct SparseFieldset {
    params: KeyedParams,
}

impl SparseFieldset {
    /// Create a fieldset, optionally seeded from a raw query string.
    #[must_use]
    pub fn new(query_str: &str) -> SparseFieldset {
        SparseFieldset {
            params: KeyedParams::new("fields", query_str),
        }
    }

    /// Request the given fields for a resource type.
    #[must_use]
    pub fn field(mut self, resource_type: &str, value: impl FilterArgument) -> SparseFieldset {
        self.params.field(resource_type, &value);
        self
    }
}

impl QueryModifier for SparseFieldset {
    fn appended_query(&self) -> String {
        self.params.render()
    }
}

/// Comma-joined value list shared by [`Include`] and [`Sort`].
#[derive(Debug, Clone)]
struct ValueList {
    keyword: &'static str,
    values: Vec<String>,
}

impl ValueList {
    fn new<I>(keyword: &'static str, values: I) -> ValueList
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        ValueList {
            keyword,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    fn render(&self) -> String {
        format!("{}={}", self.keyword, self.values.join(","))
    }
}

/// Inclusion of related resources (`include=rel1,rel1.rel2`).
#[derive(Debug, Clone)]
pub struct Include {
    values: ValueList,
}

impl Include {
    /// Request inclusion of the given relationship paths.
    #[must_use]
    pub fn new<I>(values: I) -> Include
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Include {
            values: ValueList::new("include", values),
        }
    }
}

impl QueryModifier for Include {
    fn appended_query(&self) -> String {
        self.values.render()
    }
}

/// Collection sorting (`sort=-created,title`).
#[derive(Debug, Clone)]
pub struct Sort {
    values: ValueList,
}

impl Sort {
    /// Sort by the given fields; prefix a field with `-` for descending
    /// order.
    #[must_use]
    pub fn new<I>(values: I) -> Sort
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Sort {
            values: ValueList::new("sort", values),
        }
    }
}

impl QueryModifier for Sort {
    fn appended_query(&self) -> String {
        self.values.render()
    }
}
