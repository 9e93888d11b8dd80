//! The closed event-tag set.
//!
//! Records begin with a dense integer tag; the set is closed and the
//! dispatch table in `handlers` is a compile-time array over exactly these
//! discriminants, so a tag added here without a handler fails the build.

/// Every event the instrumented engine emits, in tag order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventTag {
    CreateObjBoilerplate = 0,
    CreateArrayBoilerplate = 1,
    CreateObjectLiteral = 2,
    CreateArrayLiteral = 3,
    CreateNewObject = 4,
    CreateNewArray = 5,
    CreateContext = 6,
    CopyObject = 7,
    ChangePrototype = 8,
    NewField = 9,
    UptField = 10,
    DelField = 11,
    SetElem = 12,
    DelElem = 13,
    CowCopy = 14,
    ExpandArray = 15,
    SetMap = 16,
    ElemTransition = 17,
    CreateFunction = 18,
    GenFullCode = 19,
    GenOptCode = 20,
    GenOsrCode = 21,
    DisableOpt = 22,
    ReenableOpt = 23,
    OptFailed = 24,
    RegularDeopt = 25,
    DeoptAsInline = 26,
    ForceDeopt = 27,
    BeginDeoptOnMap = 28,
    GenDeoptMaps = 29,
    ElemToSlow = 30,
    PropToSlow = 31,
    ElemToFast = 32,
    PropToFast = 33,
    GCMoveObject = 34,
    GCMoveCode = 35,
    GCMoveShared = 36,
    GCMoveMap = 37,
}

/// Number of event tags.
pub const EVENT_COUNT: usize = 38;

impl EventTag {
    /// All tags in discriminant order.
    pub const ALL: [EventTag; EVENT_COUNT] = [
        EventTag::CreateObjBoilerplate,
        EventTag::CreateArrayBoilerplate,
        EventTag::CreateObjectLiteral,
        EventTag::CreateArrayLiteral,
        EventTag::CreateNewObject,
        EventTag::CreateNewArray,
        EventTag::CreateContext,
        EventTag::CopyObject,
        EventTag::ChangePrototype,
        EventTag::NewField,
        EventTag::UptField,
        EventTag::DelField,
        EventTag::SetElem,
        EventTag::DelElem,
        EventTag::CowCopy,
        EventTag::ExpandArray,
        EventTag::SetMap,
        EventTag::ElemTransition,
        EventTag::CreateFunction,
        EventTag::GenFullCode,
        EventTag::GenOptCode,
        EventTag::GenOsrCode,
        EventTag::DisableOpt,
        EventTag::ReenableOpt,
        EventTag::OptFailed,
        EventTag::RegularDeopt,
        EventTag::DeoptAsInline,
        EventTag::ForceDeopt,
        EventTag::BeginDeoptOnMap,
        EventTag::GenDeoptMaps,
        EventTag::ElemToSlow,
        EventTag::PropToSlow,
        EventTag::ElemToFast,
        EventTag::PropToFast,
        EventTag::GCMoveObject,
        EventTag::GCMoveCode,
        EventTag::GCMoveShared,
        EventTag::GCMoveMap,
    ];

    /// Decode a tag value.
    pub fn from_u64(value: u64) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Short text used by the debug trace.
    pub const fn text(self) -> &'static str {
        match self {
            EventTag::CreateObjBoilerplate => "+ObjTemp",
            EventTag::CreateArrayBoilerplate => "+AryTemp",
            EventTag::CreateObjectLiteral => "+ObjLit",
            EventTag::CreateArrayLiteral => "+AryLit",
            EventTag::CreateNewObject => "+Obj",
            EventTag::CreateNewArray => "+Ary",
            EventTag::CreateContext => "+FCxt",
            EventTag::CopyObject => "#Obj",
            EventTag::ChangePrototype => "!Proto",
            EventTag::NewField => "+Fld",
            EventTag::UptField => "!Fld",
            EventTag::DelField => "-Fld",
            EventTag::SetElem => "!Elm",
            EventTag::DelElem => "-Elm",
            EventTag::CowCopy => "#Cow",
            EventTag::ExpandArray => "^Ary",
            EventTag::SetMap => "=Map",
            EventTag::ElemTransition => "^Elm",
            EventTag::CreateFunction => "+func()",
            EventTag::GenFullCode => "+FulCode",
            EventTag::GenOptCode => "+OptCode",
            EventTag::GenOsrCode => "+OsrCode",
            EventTag::DisableOpt => "||Code",
            EventTag::ReenableOpt => ">Code",
            EventTag::OptFailed => "OptFail",
            EventTag::RegularDeopt => "Deopt",
            EventTag::DeoptAsInline => "DeoptInl",
            EventTag::ForceDeopt => "FrcDeopt",
            EventTag::BeginDeoptOnMap => "BegDeoptOnMap",
            EventTag::GenDeoptMaps => "GenDeoptMaps",
            EventTag::ElemToSlow => "Elm->Slow",
            EventTag::PropToSlow => "Prop->Slow",
            EventTag::ElemToFast => "Elm->Fast",
            EventTag::PropToFast => "Prop->Fast",
            EventTag::GCMoveObject => "MovObj",
            EventTag::GCMoveCode => "MovCode",
            EventTag::GCMoveShared => "MovShared",
            EventTag::GCMoveMap => "MovMap",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminants_are_dense() {
        for (i, tag) in EventTag::ALL.iter().enumerate() {
            assert_eq!(*tag as usize, i);
            assert_eq!(EventTag::from_u64(i as u64), Some(*tag));
        }
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert_eq!(EventTag::from_u64(EVENT_COUNT as u64), None);
        assert_eq!(EventTag::from_u64(u64::MAX), None);
    }

    #[test]
    fn test_every_tag_has_text() {
        for tag in EventTag::ALL {
            assert!(!tag.text().is_empty());
        }
    }
}
