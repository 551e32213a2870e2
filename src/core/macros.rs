//! 核心宏定义
//!
//! 配置结构体普遍需要手写 `Default`，这里提供统一的宏减少重复

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// use scene_binding::impl_default;
///
/// struct PoolSettings {
///     initial_size: usize,
///     label: String,
/// }
///
/// impl_default!(PoolSettings {
///     initial_size: 4,
///     label: "events".to_string(),
/// });
///
/// assert_eq!(PoolSettings::default().initial_size, 4);
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}
