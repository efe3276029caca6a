use serde::{Deserialize, Serialize};

/// Primitive kinds a script value can have.
///
/// The discriminants are part of the object file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    Object = 0,
    String = 1,
    Bool = 2,
    Byte = 3,
    Int = 4,
    Short = 5,
    Float = 6,
    Long = 7,
    Double = 8,
    Void = 9,
    Null = 10,
    Invalid = 11,
}

impl DataType {
    pub fn from_u8(value: u8) -> Option<DataType> {
        use DataType::*;
        Some(match value {
            0 => Object,
            1 => String,
            2 => Bool,
            3 => Byte,
            4 => Int,
            5 => Short,
            6 => Float,
            7 => Long,
            8 => Double,
            9 => Void,
            10 => Null,
            11 => Invalid,
            _ => return None,
        })
    }

    /// True for the integral and floating point kinds.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Byte
                | DataType::Short
                | DataType::Int
                | DataType::Long
                | DataType::Float
                | DataType::Double
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Object => "object",
            DataType::String => "string",
            DataType::Bool => "bool",
            DataType::Byte => "byte",
            DataType::Int => "int",
            DataType::Short => "short",
            DataType::Float => "float",
            DataType::Long => "long",
            DataType::Double => "double",
            DataType::Void => "void",
            DataType::Null => "null",
            DataType::Invalid => "<invalid>",
        }
    }
}

/// A full type: primitive plus array/reference markers.
///
/// Two values are equal only when all three fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataTypeValue {
    pub data_type: DataType,
    pub is_array: bool,
    pub is_reference: bool,
}

impl DataTypeValue {
    pub const VOID: DataTypeValue = DataTypeValue::scalar(DataType::Void);
    pub const NULL: DataTypeValue = DataTypeValue::scalar(DataType::Null);
    pub const INVALID: DataTypeValue = DataTypeValue::scalar(DataType::Invalid);
    pub const INT: DataTypeValue = DataTypeValue::scalar(DataType::Int);
    pub const BOOL: DataTypeValue = DataTypeValue::scalar(DataType::Bool);
    pub const OBJECT: DataTypeValue = DataTypeValue::scalar(DataType::Object);

    pub const fn new(data_type: DataType, is_array: bool, is_reference: bool) -> Self {
        Self {
            data_type,
            is_array,
            is_reference,
        }
    }

    pub const fn scalar(data_type: DataType) -> Self {
        Self::new(data_type, false, false)
    }

    pub const fn array(data_type: DataType) -> Self {
        Self::new(data_type, true, false)
    }

    /// The type of a single element of this array type.
    pub fn element(self) -> Self {
        Self {
            is_array: false,
            ..self
        }
    }

    pub fn is_void(self) -> bool {
        self.data_type == DataType::Void && !self.is_array
    }

    pub fn is_invalid(self) -> bool {
        self.data_type == DataType::Invalid
    }
}

impl Default for DataTypeValue {
    fn default() -> Self {
        DataTypeValue::VOID
    }
}

impl std::fmt::Display for DataTypeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_reference {
            write!(f, "ref ")?;
        }
        write!(f, "{}", self.data_type.name())?;
        if self.is_array {
            write!(f, "[]")?;
        }
        Ok(())
    }
}
