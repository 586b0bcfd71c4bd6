//! LEF/DEF keyword spelling of the model enums.

use tierstack_core::cell::{MacroClass, PinDirection, SignalUse, SiteClass, Symmetry};
use tierstack_core::floorplan::{Axis, BlockageKind};
use tierstack_core::geometry::Orientation;
use tierstack_core::instance::PlacementStatus;
use tierstack_core::layer::{LayerClass, RoutingDirection};
use tierstack_core::net::WireStatus;
use tierstack_core::tech::PropertyType;

pub trait Keyword: Sized + Copy + PartialEq + 'static {
    const TABLE: &'static [(Self, &'static str)];

    fn keyword(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(v, _)| *v == self)
            .map_or("", |(_, k)| *k)
    }

    /// Case-insensitive lookup.
    fn from_keyword(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::TABLE
            .iter()
            .find(|(_, k)| k.eq_ignore_ascii_case(s))
            .map(|(v, _)| *v)
    }
}

macro_rules! keywords {
    ($ty:ty { $($variant:ident => $kw:literal),* $(,)? }) => {
        impl Keyword for $ty {
            const TABLE: &'static [(Self, &'static str)] = &[$((<$ty>::$variant, $kw)),*];
        }
    };
}

keywords!(LayerClass {
    Masterslice => "MASTERSLICE",
    Implant => "IMPLANT",
    Routing => "ROUTING",
    Cut => "CUT",
    Overlap => "OVERLAP",
});

keywords!(RoutingDirection {
    Horizontal => "HORIZONTAL",
    Vertical => "VERTICAL",
    Diag45 => "DIAG45",
    Diag135 => "DIAG135",
});

keywords!(PinDirection {
    Input => "INPUT",
    Output => "OUTPUT",
    OutputTristate => "OUTPUT TRISTATE",
    Inout => "INOUT",
    Feedthru => "FEEDTHRU",
});

keywords!(SignalUse {
    Signal => "SIGNAL",
    Analog => "ANALOG",
    Power => "POWER",
    Ground => "GROUND",
    Clock => "CLOCK",
    Tieoff => "TIEOFF",
    Scan => "SCAN",
    Reset => "RESET",
});

keywords!(Symmetry { X => "X", Y => "Y", R90 => "R90" });

keywords!(SiteClass { Core => "CORE", Pad => "PAD" });

keywords!(MacroClass {
    Cover => "COVER",
    Ring => "RING",
    Block => "BLOCK",
    Pad => "PAD",
    Core => "CORE",
    Endcap => "ENDCAP",
});

keywords!(PlacementStatus {
    Unplaced => "UNPLACED",
    Placed => "PLACED",
    Fixed => "FIXED",
    Cover => "COVER",
});

keywords!(WireStatus {
    Cover => "COVER",
    Fixed => "FIXED",
    Routed => "ROUTED",
    Noshield => "NOSHIELD",
    Shield => "SHIELD",
});

keywords!(PropertyType {
    Integer => "INTEGER",
    Real => "REAL",
    String => "STRING",
});

keywords!(Axis { X => "X", Y => "Y" });

keywords!(BlockageKind { Placement => "PLACEMENT", Routing => "LAYER" });

keywords!(Orientation {
    N => "N",
    W => "W",
    S => "S",
    E => "E",
    FN => "FN",
    FW => "FW",
    FS => "FS",
    FE => "FE",
});

/// Parse an optional keyword, logging and dropping an unknown one.
pub fn parse_opt<T: Keyword>(value: Option<&str>, what: &str, owner: &str) -> Option<T> {
    let value = value?;
    let parsed = T::from_keyword(value);
    if parsed.is_none() {
        log::error!("{owner}: unknown {what} '{value}', ignored");
    }
    parsed
}

pub fn parse_all<T: Keyword>(values: &[String], what: &str, owner: &str) -> Vec<T> {
    values
        .iter()
        .filter_map(|v| parse_opt(Some(v.as_str()), what, owner))
        .collect()
}

pub fn spell_all<T: Keyword>(values: &[T]) -> Vec<String> {
    values.iter().map(|v| v.keyword().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(PinDirection::from_keyword("output tristate"), Some(PinDirection::OutputTristate));
        assert_eq!(BlockageKind::from_keyword("LAYER"), Some(BlockageKind::Routing));
        assert_eq!(LayerClass::from_keyword("via"), None);
        assert_eq!(Orientation::FS.keyword(), Orientation::FS.as_str());
    }

    #[test]
    fn test_unknown_keyword_is_dropped() {
        let _ = env_logger::builder().is_test(true).try_init();
        let uses: Vec<SignalUse> =
            parse_all(&["POWER".to_string(), "PLASMA".to_string()], "use", "pin VDD");
        assert_eq!(uses, [SignalUse::Power]);
    }
}
