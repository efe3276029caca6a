use crate::frontend::token::TokenKind;
use crate::lang::data_type::{DataType, DataTypeValue};

/// Whether a value of type `from` may be used where `to` is expected
/// without an explicit cast.
///
/// Arrays only convert to an identical array type (or from `null`); scalar
/// primitives convert freely between each other, except that `object` only
/// accepts `object` or `null`.
pub fn can_implicitly_cast(to: DataTypeValue, from: DataTypeValue) -> bool {
    if to == from {
        return true;
    }
    if to.is_void() || from.is_void() || to.is_invalid() || from.is_invalid() {
        return false;
    }
    if from.data_type == DataType::Null && !from.is_array {
        return to.is_array || matches!(to.data_type, DataType::Object | DataType::String);
    }
    if to.data_type == DataType::Null && !to.is_array {
        return from.is_array || matches!(from.data_type, DataType::Object | DataType::String);
    }
    if to.is_array != from.is_array {
        return false;
    }
    if to.is_array {
        return to.data_type == from.data_type;
    }
    if to.is_reference != from.is_reference {
        return false;
    }

    match (to.data_type, from.data_type) {
        (DataType::Object, _) | (_, DataType::Object) => false,
        _ => true,
    }
}

/// Whether an explicit `(Type)` cast from `from` to `to` is allowed.
pub fn can_explicitly_cast(to: DataTypeValue, from: DataTypeValue) -> bool {
    if can_implicitly_cast(to, from) {
        return true;
    }
    if to.is_void() || from.is_void() {
        return false;
    }
    // object references may be narrowed to arrays and back; the VM checks
    if to.is_array != from.is_array {
        let scalar = if to.is_array { from } else { to };
        return scalar.data_type == DataType::Object && !scalar.is_array;
    }
    !to.is_array
}

/// Operator x type validity table.
///
/// `ty` is the type both operands have been converted to.
pub fn operator_valid(op: TokenKind, ty: DataTypeValue) -> bool {
    use TokenKind::*;

    let dt = ty.data_type;
    if ty.is_array {
        return matches!(op, Equal | NotEqual);
    }
    match op {
        Plus => dt.is_numeric() || dt == DataType::String,
        Minus | Star | Slash | Percent | Increment | Decrement => dt.is_numeric(),
        Caret | Pipe | Ampersand | ShiftLeft | ShiftRight | Tilde => dt == DataType::Int,
        LogicalAnd | LogicalOr | Not => dt == DataType::Bool,
        Equal | NotEqual => dt != DataType::Void && dt != DataType::Invalid,
        Less | Greater | LessEqual | GreaterEqual => {
            !matches!(
                dt,
                DataType::Object
                    | DataType::String
                    | DataType::Null
                    | DataType::Void
                    | DataType::Invalid
            )
        }
        _ => false,
    }
}

pub fn is_relational(op: TokenKind) -> bool {
    use TokenKind::*;
    matches!(op, Equal | NotEqual | Less | Greater | LessEqual | GreaterEqual)
}

/// Parameter types a console command may take.
pub fn is_console_parameter(ty: DataTypeValue) -> bool {
    !ty.is_array
        && matches!(
            ty.data_type,
            DataType::Bool | DataType::Int | DataType::Float | DataType::String
        )
}
