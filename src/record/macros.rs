/// Declares a struct and implements [`FieldSource`](crate::record::FieldSource),
/// [`DynRecord`](crate::record::DynRecord) and [`Record`](crate::record::Record) for it.
///
/// Every field type must implement [`FieldValue`](crate::record::FieldValue) and the
/// struct must implement `Default` (usually derived through the attributes).
///
/// ```
/// use memomap::record_struct;
///
/// record_struct! {
///     #[derive(Debug, Clone, Default)]
///     pub struct ThingDto {
///         pub id: i64,
///         pub title: String,
///     }
/// }
/// ```
#[macro_export]
macro_rules! record_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$field_meta:meta])* $field_vis:vis $field:ident : $field_ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$field_meta])* $field_vis $field: $field_ty, )+
        }

        impl $crate::record::FieldSource for $name {
            fn field(&self, name: &str) -> Option<$crate::core::Value> {
                match name {
                    $(
                        stringify!($field) => Some(
                            <$field_ty as $crate::record::FieldValue>::to_value(&self.$field)
                        ),
                    )+
                    _ => None,
                }
            }
        }

        impl $crate::record::DynRecord for $name {
            fn record_type(&self) -> $crate::core::RecordType {
                <Self as $crate::record::Record>::record_type_of()
            }

            fn set_field(
                &mut self,
                name: &str,
                value: $crate::core::Value,
            ) -> $crate::core::Result<()> {
                match name {
                    $(
                        stringify!($field) => {
                            self.$field =
                                <$field_ty as $crate::record::FieldValue>::from_value(value)?;
                            Ok(())
                        }
                    )+
                    _ => Err($crate::core::DbError::FieldNotFound(
                        name.to_string(),
                        stringify!($name).to_string(),
                    )),
                }
            }

            fn as_any(&self) -> &dyn std::any::Any {
                self
            }

            fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
                self
            }
        }

        impl $crate::record::Record for $name {
            fn record_type_of() -> $crate::core::RecordType {
                const FIELDS: &[$crate::core::FieldDescriptor] = &[
                    $(
                        $crate::core::FieldDescriptor::new(
                            stringify!($field),
                            <$field_ty as $crate::record::FieldValue>::DATA_TYPE,
                            <$field_ty as $crate::record::FieldValue>::NULLABLE,
                        ),
                    )+
                ];
                $crate::core::RecordType::new::<Self>(stringify!($name), FIELDS)
            }
        }
    };
}
