use serde::{Deserialize, Serialize};

/// Scalar kind of a formula value, without const-ness.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DataTypeKind {
    Null,
    Boolean,
    Integer,
    Float,
    Date,
    Datetime,
    /// Datetime with timezone semantics. Values are stored wall-clock;
    /// the offset is normalized away before compilation.
    Genericdatetime,
    String,
    Uuid,
    Markup,
    Geopoint,
    Geopolygon,
    ArrayInt,
    ArrayFloat,
    ArrayStr,
    TreeStr,
}

/// Data type of a formula expression.
///
/// Every kind comes in a *const* and a *runtime* flavor: a literal `5` is
/// `CONST_INTEGER` while a column value is `INTEGER`. Const-ness participates
/// in overload matching (a const argument satisfies a runtime parameter, not
/// the other way around) and lets variants fold literals.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub kind: DataTypeKind,
    pub is_const: bool,
}

macro_rules! data_type_consts {
    ($($const_name:ident, $runtime_name:ident => $kind:ident;)*) => {
        $(
            pub const $runtime_name: DataType = DataType::new(DataTypeKind::$kind, false);
            pub const $const_name: DataType = DataType::new(DataTypeKind::$kind, true);
        )*
    };
}

impl DataType {
    pub const fn new(kind: DataTypeKind, is_const: bool) -> Self {
        DataType { kind, is_const }
    }

    data_type_consts! {
        CONST_BOOLEAN, BOOLEAN => Boolean;
        CONST_INTEGER, INTEGER => Integer;
        CONST_FLOAT, FLOAT => Float;
        CONST_DATE, DATE => Date;
        CONST_DATETIME, DATETIME => Datetime;
        CONST_GENERICDATETIME, GENERICDATETIME => Genericdatetime;
        CONST_STRING, STRING => String;
        CONST_UUID, UUID => Uuid;
        CONST_MARKUP, MARKUP => Markup;
        CONST_GEOPOINT, GEOPOINT => Geopoint;
        CONST_GEOPOLYGON, GEOPOLYGON => Geopolygon;
        CONST_ARRAY_INT, ARRAY_INT => ArrayInt;
        CONST_ARRAY_FLOAT, ARRAY_FLOAT => ArrayFloat;
        CONST_ARRAY_STR, ARRAY_STR => ArrayStr;
        CONST_TREE_STR, TREE_STR => TreeStr;
    }

    /// NULL has no runtime flavor; a typed NULL is always a literal.
    pub const NULL: DataType = DataType::new(DataTypeKind::Null, true);

    pub fn to_const(self) -> DataType {
        DataType::new(self.kind, true)
    }

    pub fn to_runtime(self) -> DataType {
        if self.kind == DataTypeKind::Null {
            return self;
        }
        DataType::new(self.kind, false)
    }

    /// Kinds this kind may be implicitly widened to, in widening order.
    pub fn autocast_kinds(kind: DataTypeKind) -> &'static [DataTypeKind] {
        use DataTypeKind::*;
        match kind {
            Boolean => &[Integer, Float],
            Integer => &[Float],
            Date => &[Datetime, Genericdatetime],
            Datetime => &[Genericdatetime],
            _ => &[],
        }
    }

    /// Whether a value of `self` is acceptable where `target` is expected.
    ///
    /// `CONST_T` casts to both `T` and `CONST_T`; a runtime value never casts
    /// to a const parameter. NULL casts to everything.
    pub fn casts_to(self, target: DataType) -> bool {
        if target.is_const && !self.is_const {
            return false;
        }
        if self.kind == DataTypeKind::Null {
            return true;
        }
        self.kind == target.kind || Self::autocast_kinds(self.kind).contains(&target.kind)
    }

    /// Position within the widening total order; higher loses no information.
    fn priority(self) -> u8 {
        use DataTypeKind::*;
        match self.kind {
            Null => 0,
            Boolean => 1,
            Integer => 2,
            Float => 3,
            Date => 4,
            Datetime => 5,
            Genericdatetime => 6,
            String => 7,
            Uuid => 8,
            Markup => 9,
            Geopoint => 10,
            Geopolygon => 11,
            ArrayInt => 12,
            ArrayFloat => 13,
            ArrayStr => 14,
            TreeStr => 15,
        }
    }

    /// Widest common type of two values; const only when both sides are.
    pub fn common_type(a: DataType, b: DataType) -> DataType {
        let kind = if a.priority() >= b.priority() {
            a.kind
        } else {
            b.kind
        };
        DataType::new(kind, a.is_const && b.is_const)
    }

    pub fn common_type_of<I: IntoIterator<Item = DataType>>(types: I) -> DataType {
        types
            .into_iter()
            .fold(DataType::NULL, |acc, t| DataType::common_type(acc, t))
    }

    /// Element kind of an array- or tree-typed value.
    pub fn array_element(self) -> Option<DataType> {
        use DataTypeKind::*;
        let element = match self.kind {
            ArrayInt => Integer,
            ArrayFloat => Float,
            ArrayStr | TreeStr => String,
            _ => return None,
        };
        Some(DataType::new(element, false))
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_const && self.kind != DataTypeKind::Null {
            write!(f, "CONST_{}", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl std::fmt::Debug for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(DataType::CONST_INTEGER, DataType::INTEGER, true)]
    #[case(DataType::INTEGER, DataType::CONST_INTEGER, false)]
    #[case(DataType::CONST_INTEGER, DataType::CONST_INTEGER, true)]
    #[case(DataType::INTEGER, DataType::FLOAT, true)]
    #[case(DataType::FLOAT, DataType::INTEGER, false)]
    #[case(DataType::DATE, DataType::GENERICDATETIME, true)]
    #[case(DataType::NULL, DataType::ARRAY_STR, true)]
    #[case(DataType::STRING, DataType::INTEGER, false)]
    fn casts(#[case] from: DataType, #[case] to: DataType, #[case] expected: bool) {
        assert_eq!(from.casts_to(to), expected);
    }

    #[test]
    fn const_is_compatible_wherever_runtime_is() {
        // The core overload invariant: CONST_T works wherever T does.
        for kind in [
            DataTypeKind::Integer,
            DataTypeKind::Float,
            DataTypeKind::Date,
            DataTypeKind::ArrayStr,
        ] {
            let runtime = DataType::new(kind, false);
            let constant = DataType::new(kind, true);
            assert!(constant.casts_to(runtime));
            assert!(runtime.casts_to(runtime));
        }
    }

    #[test]
    fn common_type_widens() {
        assert_eq!(
            DataType::common_type(DataType::INTEGER, DataType::FLOAT),
            DataType::FLOAT
        );
        assert_eq!(
            DataType::common_type(DataType::CONST_INTEGER, DataType::CONST_FLOAT),
            DataType::CONST_FLOAT
        );
        // One runtime side makes the result runtime.
        assert_eq!(
            DataType::common_type(DataType::CONST_DATE, DataType::DATETIME),
            DataType::DATETIME
        );
        assert_eq!(
            DataType::common_type_of([DataType::NULL, DataType::CONST_BOOLEAN]),
            DataType::CONST_BOOLEAN
        );
    }

    #[test]
    fn const_runtime_round_trip() {
        assert_eq!(DataType::INTEGER.to_const(), DataType::CONST_INTEGER);
        assert_eq!(DataType::CONST_INTEGER.to_runtime(), DataType::INTEGER);
        // NULL is always a literal; there is no runtime flavor to go to.
        assert_eq!(DataType::NULL.to_runtime(), DataType::NULL);
    }

    #[test]
    fn display_names() {
        assert_eq!(DataType::CONST_ARRAY_INT.to_string(), "CONST_ARRAY_INT");
        assert_eq!(DataType::GENERICDATETIME.to_string(), "GENERICDATETIME");
        assert_eq!(DataType::NULL.to_string(), "NULL");
    }
}
