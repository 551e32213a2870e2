//! 字段访问门控
//!
//! 回答"这个字段此刻是否可读/可写"。规则取决于三个输入：字段的访问类型、
//! 访问视角（脚本内部字段还是外部节点字段）、节点是否已完成初始化。
//!
//! | 访问类型 | 内部可读 | 外部可读 | 内部可写 | 外部可写（已初始化） | 外部可写（初始化中） |
//! |---|---|---|---|---|---|
//! | input-only | 是 | 否 | 否 | 是 | 否 |
//! | output-only | 否 | 是 | 是 | 否 | 否 |
//! | input-output | 是 | 是 | 是 | 是 | 是 |
//! | initialize-only | 是 | 否 | 是 | 否 | 是 |

use crate::core::error::{BindingError, BindingResult};
use crate::engine::{AccessKind, FieldDeclaration};

/// 字段当前是否可读
pub fn is_readable(decl: &FieldDeclaration, internal: bool) -> bool {
    match decl.access() {
        AccessKind::InputOnly | AccessKind::InitializeOnly => internal,
        AccessKind::OutputOnly => !internal,
        AccessKind::InputOutput => true,
    }
}

/// 字段当前是否可写
pub fn is_writable(decl: &FieldDeclaration, internal: bool, setup_finished: bool) -> bool {
    match decl.access() {
        AccessKind::InputOnly => !internal && setup_finished,
        AccessKind::OutputOnly => internal,
        AccessKind::InputOutput => true,
        AccessKind::InitializeOnly => internal || !setup_finished,
    }
}

/// 一次访问检查所需的字段状态快照
#[derive(Debug, Clone, Copy)]
pub struct AccessCheck<'a> {
    pub decl: &'a FieldDeclaration,
    pub internal: bool,
    pub read_only: bool,
    pub access_permitted: bool,
    pub setup_finished: bool,
}

/// 依次检查只读标记、访问时序、访问方向
///
/// 只读标记只约束写操作。
pub fn check_access(check: &AccessCheck<'_>, for_write: bool) -> BindingResult<()> {
    let name = check.decl.name();

    if for_write && check.read_only {
        return Err(BindingError::ReadOnlyViolation(name.to_string()));
    }

    if !check.access_permitted {
        return Err(BindingError::TimingViolation(name.to_string()));
    }

    if for_write {
        if !is_writable(check.decl, check.internal, check.setup_finished) {
            return Err(BindingError::NotWritableViolation(name.to_string()));
        }
    } else if !is_readable(check.decl, check.internal) {
        return Err(BindingError::NotReadableViolation(name.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ValueKind;
    use proptest::prelude::*;

    fn decl(access: AccessKind) -> FieldDeclaration {
        FieldDeclaration::new("f", access, ValueKind::Scalar)
    }

    #[test]
    fn test_access_table() {
        // (访问类型, 内部可读, 外部可读, 内部可写, 外部可写-已初始化, 外部可写-初始化中)
        let table = [
            (AccessKind::InputOnly, true, false, false, true, false),
            (AccessKind::OutputOnly, false, true, true, false, false),
            (AccessKind::InputOutput, true, true, true, true, true),
            (AccessKind::InitializeOnly, true, false, true, false, true),
        ];

        for (access, r_int, r_ext, w_int, w_ext_done, w_ext_pending) in table {
            let d = decl(access);
            assert_eq!(is_readable(&d, true), r_int, "{} internal read", access);
            assert_eq!(is_readable(&d, false), r_ext, "{} external read", access);
            assert_eq!(is_writable(&d, true, true), w_int, "{} internal write", access);
            assert_eq!(is_writable(&d, true, false), w_int, "{} internal write", access);
            assert_eq!(is_writable(&d, false, true), w_ext_done, "{} external write", access);
            assert_eq!(
                is_writable(&d, false, false),
                w_ext_pending,
                "{} external write during setup",
                access
            );
        }
    }

    #[test]
    fn test_check_order() {
        let d = decl(AccessKind::InputOnly);
        let check = AccessCheck {
            decl: &d,
            internal: true,
            read_only: true,
            access_permitted: false,
            setup_finished: true,
        };

        // 只读优先于时序
        assert!(matches!(
            check_access(&check, true),
            Err(BindingError::ReadOnlyViolation(_))
        ));
        // 读操作不受只读影响
        assert!(matches!(
            check_access(&check, false),
            Err(BindingError::TimingViolation(_))
        ));

        let open = AccessCheck {
            access_permitted: true,
            read_only: false,
            ..check
        };
        assert!(check_access(&open, false).is_ok());
        assert!(matches!(
            check_access(&open, true),
            Err(BindingError::NotWritableViolation(_))
        ));
    }

    fn any_access() -> impl Strategy<Value = AccessKind> {
        prop::sample::select(AccessKind::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_closed_window_always_timing(
            access in any_access(),
            internal in any::<bool>(),
            setup_finished in any::<bool>(),
            for_write in any::<bool>(),
        ) {
            let d = decl(access);
            let check = AccessCheck {
                decl: &d,
                internal,
                read_only: false,
                access_permitted: false,
                setup_finished,
            };
            prop_assert!(matches!(
                check_access(&check, for_write),
                Err(BindingError::TimingViolation(_))
            ));
        }

        #[test]
        fn prop_open_window_matches_predicates(
            access in any_access(),
            internal in any::<bool>(),
            setup_finished in any::<bool>(),
        ) {
            let d = decl(access);
            let check = AccessCheck {
                decl: &d,
                internal,
                read_only: false,
                access_permitted: true,
                setup_finished,
            };
            prop_assert_eq!(check_access(&check, false).is_ok(), is_readable(&d, internal));
            prop_assert_eq!(
                check_access(&check, true).is_ok(),
                is_writable(&d, internal, setup_finished)
            );
        }
    }
}
