//! Reflective fallback: building scan destinations from column names.
//!
//! The dispatcher only calls a mapper for record types without fast-scan.
//! [`TagMapper`] is the default implementation: a record lists its fields
//! under a tag name through [`Tagged`] and the mapper orders them to match the
//! result columns.

use crate::config::ColumnCase;
use crate::error::MappingError;
use crate::unmarshal::Scan;
use std::any::type_name;

/// Builds scan destinations for `target` from the result's column names.
pub trait ReflectiveMapper<T, R: ?Sized> {
    fn map_columns<'t>(
        &self,
        target: &'t mut T,
        columns: &[String],
    ) -> Result<Vec<&'t mut dyn Scan<R>>, MappingError>;
}

impl<T, R: ?Sized, M: ReflectiveMapper<T, R> + ?Sized> ReflectiveMapper<T, R> for &M {
    fn map_columns<'t>(
        &self,
        target: &'t mut T,
        columns: &[String],
    ) -> Result<Vec<&'t mut dyn Scan<R>>, MappingError> {
        (**self).map_columns(target, columns)
    }
}

/// A record whose fields are addressable by tag name.
pub trait Tagged<R: ?Sized> {
    /// Every mappable field with its tag, in any order.
    fn tagged_fields(&mut self) -> Vec<(&'static str, &mut dyn Scan<R>)>;
}

/// Default mapper: matches column names against [`Tagged`] field tags.
///
/// Columns without a tagged field and repeated columns are errors. Fields
/// without a column are left untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagMapper {
    case: ColumnCase,
}

impl TagMapper {
    pub fn new(case: ColumnCase) -> Self {
        Self { case }
    }

    pub fn case(&self) -> ColumnCase {
        self.case
    }
}

impl<T: Tagged<R>, R: ?Sized> ReflectiveMapper<T, R> for TagMapper {
    fn map_columns<'t>(
        &self,
        target: &'t mut T,
        columns: &[String],
    ) -> Result<Vec<&'t mut dyn Scan<R>>, MappingError> {
        let mut fields: Vec<Option<(&'static str, &'t mut dyn Scan<R>)>> =
            target.tagged_fields().into_iter().map(Some).collect();
        let mut destinations = Vec::with_capacity(columns.len());

        for (position, column) in columns.iter().enumerate() {
            let found = fields
                .iter_mut()
                .find(|field| matches!(field, Some((tag, _)) if self.case.matches(tag, column)))
                .and_then(Option::take);
            match found {
                Some((_, slot)) => destinations.push(slot),
                None if columns[..position]
                    .iter()
                    .any(|seen| self.case.matches(seen, column)) =>
                {
                    return Err(MappingError::DuplicateColumn {
                        column: column.clone(),
                    });
                }
                None => {
                    return Err(MappingError::UnknownColumn {
                        target: type_name::<T>(),
                        column: column.clone(),
                    });
                }
            }
        }
        Ok(destinations)
    }
}

/// Mapper for record types that only support fast-scan.
///
/// Any call means a type reached the reflective path without a mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastScanOnly;

impl<T, R: ?Sized> ReflectiveMapper<T, R> for FastScanOnly {
    fn map_columns<'t>(
        &self,
        _target: &'t mut T,
        _columns: &[String],
    ) -> Result<Vec<&'t mut dyn Scan<R>>, MappingError> {
        Err(MappingError::NotMappable {
            target: type_name::<T>(),
        })
    }
}

/// Implement [`Tagged`] by listing fields, optionally renamed.
///
/// ```ignore
/// impl_tagged!(User => SqliteRow { id, name = "user_name" });
/// ```
#[macro_export]
macro_rules! impl_tagged {
    (@tag $field:ident) => {
        stringify!($field)
    };
    (@tag $field:ident $tag:literal) => {
        $tag
    };
    ($target:ty => $row:ty { $($field:ident $(= $tag:literal)?),+ $(,)? }) => {
        impl $crate::unmarshal::Tagged<$row> for $target {
            fn tagged_fields(
                &mut self,
            ) -> Vec<(&'static str, &mut dyn $crate::unmarshal::Scan<$row>)> {
                let mut fields: Vec<(&'static str, &mut dyn $crate::unmarshal::Scan<$row>)> =
                    Vec::new();
                $(
                    fields.push((
                        $crate::impl_tagged!(@tag $field $($tag)?),
                        &mut self.$field,
                    ));
                )+
                fields
            }
        }
    };
}
