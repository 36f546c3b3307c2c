//! Per-call options for document store operations.
//!
//! Every field is optional and `None` means "use the engine default". Values are
//! never validated: a non-positive `limit` or `skip` is simply ignored rather
//! than rejected, so callers passing `0` or `-1` for "no limit" keep working.

use bson::Document;

/// Options for `insert_one`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOneOptions {
    /// Skip the collection's validator for this write.
    pub bypass_document_validation: Option<bool>,
}

impl InsertOneOptions {
    /// Create a builder.
    pub fn builder() -> InsertOneOptionsBuilder {
        InsertOneOptionsBuilder::default()
    }
}

/// Builder for InsertOneOptions.
#[derive(Debug, Clone, Default)]
pub struct InsertOneOptionsBuilder {
    options: InsertOneOptions,
}

impl InsertOneOptionsBuilder {
    /// Set validation bypass.
    pub fn bypass_document_validation(mut self, bypass: bool) -> Self {
        self.options.bypass_document_validation = Some(bypass);
        self
    }

    /// Build the options.
    pub fn build(self) -> InsertOneOptions {
        self.options
    }
}

/// Options for `insert_many`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyOptions {
    /// Stop at the first failed document (engine default: true).
    pub ordered: Option<bool>,
    /// Skip the collection's validator for this write.
    pub bypass_document_validation: Option<bool>,
}

impl InsertManyOptions {
    /// Create a builder.
    pub fn builder() -> InsertManyOptionsBuilder {
        InsertManyOptionsBuilder::default()
    }

    /// Whether the batch is applied in order with fail-fast semantics.
    pub fn is_ordered(&self) -> bool {
        self.ordered.unwrap_or(true)
    }
}

/// Builder for InsertManyOptions.
#[derive(Debug, Clone, Default)]
pub struct InsertManyOptionsBuilder {
    options: InsertManyOptions,
}

impl InsertManyOptionsBuilder {
    /// Set ordered option.
    pub fn ordered(mut self, ordered: bool) -> Self {
        self.options.ordered = Some(ordered);
        self
    }

    /// Set validation bypass.
    pub fn bypass_document_validation(mut self, bypass: bool) -> Self {
        self.options.bypass_document_validation = Some(bypass);
        self
    }

    /// Build the options.
    pub fn build(self) -> InsertManyOptions {
        self.options
    }
}

/// Options for `find_one`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneOptions {
    /// Projection (fields to include/exclude).
    pub projection: Option<Document>,
}

impl FindOneOptions {
    /// Create a builder.
    pub fn builder() -> FindOneOptionsBuilder {
        FindOneOptionsBuilder::default()
    }
}

/// Builder for FindOneOptions.
#[derive(Debug, Clone, Default)]
pub struct FindOneOptionsBuilder {
    options: FindOneOptions,
}

impl FindOneOptionsBuilder {
    /// Set the projection.
    pub fn projection(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    /// Build the options.
    pub fn build(self) -> FindOneOptions {
        self.options
    }
}

/// Options for `find`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Maximum number of documents to return; `<= 0` means unbounded.
    pub limit: Option<i64>,
    /// Number of documents to skip; `<= 0` means none.
    pub skip: Option<i64>,
    /// Sort order. Without one the engine order is unspecified.
    pub sort: Option<Document>,
    /// Projection (fields to include/exclude).
    pub projection: Option<Document>,
    /// Let the engine spill large sorts to disk.
    pub allow_disk_use: Option<bool>,
    /// Batch size for cursor.
    pub batch_size: Option<u32>,
}

impl FindOptions {
    /// Create a builder.
    pub fn builder() -> FindOptionsBuilder {
        FindOptionsBuilder::default()
    }

    /// The limit to send to the engine, if any.
    pub fn effective_limit(&self) -> Option<i64> {
        self.limit.filter(|limit| *limit > 0)
    }

    /// The skip to send to the engine, if any.
    pub fn effective_skip(&self) -> Option<u64> {
        self.skip.filter(|skip| *skip > 0).map(|skip| skip as u64)
    }
}

/// Builder for FindOptions.
#[derive(Debug, Clone, Default)]
pub struct FindOptionsBuilder {
    options: FindOptions,
}

impl FindOptionsBuilder {
    /// Set the limit.
    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    /// Set the skip.
    pub fn skip(mut self, skip: i64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Set the sort order.
    pub fn sort(mut self, sort: Document) -> Self {
        self.options.sort = Some(sort);
        self
    }

    /// Set the projection.
    pub fn projection(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    /// Allow disk use.
    pub fn allow_disk_use(mut self, allow: bool) -> Self {
        self.options.allow_disk_use = Some(allow);
        self
    }

    /// Set the batch size.
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.options.batch_size = Some(batch_size);
        self
    }

    /// Build the options.
    pub fn build(self) -> FindOptions {
        self.options
    }
}

/// Options for `update_one`.
///
/// `update_many` takes no options: it never upserts and never bypasses
/// validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    /// Whether to insert if no documents match.
    pub upsert: Option<bool>,
    /// Skip the collection's validator for this write.
    pub bypass_document_validation: Option<bool>,
}

impl UpdateOptions {
    /// Create a builder.
    pub fn builder() -> UpdateOptionsBuilder {
        UpdateOptionsBuilder::default()
    }
}

/// Builder for UpdateOptions.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptionsBuilder {
    options: UpdateOptions,
}

impl UpdateOptionsBuilder {
    /// Set upsert option.
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.options.upsert = Some(upsert);
        self
    }

    /// Set validation bypass.
    pub fn bypass_document_validation(mut self, bypass: bool) -> Self {
        self.options.bypass_document_validation = Some(bypass);
        self
    }

    /// Build the options.
    pub fn build(self) -> UpdateOptions {
        self.options
    }
}

/// Options for `aggregate`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    /// Let the engine spill large stages to disk.
    pub allow_disk_use: Option<bool>,
    /// Skip the validator of `$out`/`$merge` targets.
    pub bypass_document_validation: Option<bool>,
    /// Batch size for cursor.
    pub batch_size: Option<u32>,
}

impl AggregateOptions {
    /// Create a builder.
    pub fn builder() -> AggregateOptionsBuilder {
        AggregateOptionsBuilder::default()
    }
}

/// Builder for AggregateOptions.
#[derive(Debug, Clone, Default)]
pub struct AggregateOptionsBuilder {
    options: AggregateOptions,
}

impl AggregateOptionsBuilder {
    /// Allow disk use.
    pub fn allow_disk_use(mut self, allow: bool) -> Self {
        self.options.allow_disk_use = Some(allow);
        self
    }

    /// Set validation bypass.
    pub fn bypass_document_validation(mut self, bypass: bool) -> Self {
        self.options.bypass_document_validation = Some(bypass);
        self
    }

    /// Set the batch size.
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.options.batch_size = Some(batch_size);
        self
    }

    /// Build the options.
    pub fn build(self) -> AggregateOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_find_options_builder() {
        let options = FindOptions::builder()
            .limit(10)
            .skip(5)
            .sort(doc! { "created": -1 })
            .projection(doc! { "name": 1, "email": 1 })
            .allow_disk_use(true)
            .batch_size(100)
            .build();

        assert_eq!(options.limit, Some(10));
        assert_eq!(options.skip, Some(5));
        assert!(options.sort.is_some());
        assert!(options.projection.is_some());
        assert_eq!(options.allow_disk_use, Some(true));
        assert_eq!(options.batch_size, Some(100));
    }

    #[test]
    fn test_find_options_default() {
        let options = FindOptions::default();
        assert!(options.limit.is_none());
        assert!(options.skip.is_none());
        assert!(options.sort.is_none());
        assert!(options.projection.is_none());
        assert!(options.allow_disk_use.is_none());
        assert!(options.batch_size.is_none());
    }

    #[test]
    fn test_non_positive_limit_and_skip_are_ignored() {
        let options = FindOptions::builder().limit(0).skip(-3).build();
        assert_eq!(options.effective_limit(), None);
        assert_eq!(options.effective_skip(), None);

        let options = FindOptions::builder().limit(-1).skip(0).build();
        assert_eq!(options.effective_limit(), None);
        assert_eq!(options.effective_skip(), None);

        let options = FindOptions::builder().limit(7).skip(2).build();
        assert_eq!(options.effective_limit(), Some(7));
        assert_eq!(options.effective_skip(), Some(2));
    }

    #[test]
    fn test_insert_many_defaults_to_ordered() {
        assert!(InsertManyOptions::default().is_ordered());
        assert!(!InsertManyOptions::builder().ordered(false).build().is_ordered());
    }

    #[test]
    fn test_update_options_builder() {
        let options = UpdateOptions::builder()
            .upsert(true)
            .bypass_document_validation(false)
            .build();

        assert_eq!(options.upsert, Some(true));
        assert_eq!(options.bypass_document_validation, Some(false));
    }

    #[test]
    fn test_update_options_default() {
        let options = UpdateOptions::default();
        assert!(options.upsert.is_none());
        assert!(options.bypass_document_validation.is_none());
    }

    #[test]
    fn test_aggregate_options_builder() {
        let options = AggregateOptions::builder()
            .allow_disk_use(true)
            .bypass_document_validation(true)
            .build();
        assert_eq!(options.allow_disk_use, Some(true));
        assert_eq!(options.bypass_document_validation, Some(true));
        assert!(options.batch_size.is_none());
    }
}
