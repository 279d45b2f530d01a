use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{
    de::{self, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::error::{HeaterError, Result};

pub const HOURS_PER_DAY: usize = 24;
pub const DAYS_PER_WEEK: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub const ALL: [Self; DAYS_PER_WEEK] = [
        Self::Mon,
        Self::Tue,
        Self::Wed,
        Self::Thu,
        Self::Fri,
        Self::Sat,
        Self::Sun,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Mon => 0,
            Self::Tue => 1,
            Self::Wed => 2,
            Self::Thu => 3,
            Self::Fri => 4,
            Self::Sat => 5,
            Self::Sun => 6,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Mon => Self::Mon,
            Weekday::Tue => Self::Tue,
            Weekday::Wed => Self::Wed,
            Weekday::Thu => Self::Thu,
            Weekday::Fri => Self::Fri,
            Weekday::Sat => Self::Sat,
            Weekday::Sun => Self::Sun,
        }
    }

    /// Key used in the program document.
    pub fn name(self) -> &'static str {
        match self {
            Self::Mon => "monday",
            Self::Tue => "tuesday",
            Self::Wed => "wednesday",
            Self::Thu => "thursday",
            Self::Fri => "friday",
            Self::Sat => "saturday",
            Self::Sun => "sunday",
        }
    }

    /// Case-insensitive English weekday name; whitespace is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        Self::ALL.into_iter().find(|day| day.name() == normalized)
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Program identifier. Stored as a decimal string, integers accepted on read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramId(u32);

impl ProgramId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProgramId {
    type Err = HeaterError;

    fn from_str(raw: &str) -> Result<Self> {
        raw.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| HeaterError::invalid_input(format!("`{raw}` is not a program number")))
    }
}

impl Serialize for ProgramId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ProgramId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ProgramIdVisitor;

        impl Visitor<'_> for ProgramIdVisitor {
            type Value = ProgramId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a program number as string or integer")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<ProgramId, E> {
                u32::try_from(value)
                    .map(ProgramId)
                    .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(value), &self))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<ProgramId, E> {
                u32::try_from(value)
                    .map(ProgramId)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<ProgramId, E> {
                value
                    .parse()
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_any(ProgramIdVisitor)
    }
}

/// One (day, hour) slot of a program.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleCell {
    /// Heat while the room is below `desiredTemp`.
    Flag(bool),
    /// Heat while the room is below this value, ignoring `desiredTemp`.
    Override(f64),
}

impl Default for ScheduleCell {
    fn default() -> Self {
        Self::Flag(false)
    }
}

impl ScheduleCell {
    fn validate(self) -> Result<Self> {
        match self {
            Self::Override(value) if !value.is_finite() => Err(HeaterError::invalid_input(
                "override temperature must be a finite number",
            )),
            cell => Ok(cell),
        }
    }
}

/// Hour selector accepted by `ProgramBook::edit`: a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HourInput {
    Number(i64),
    Text(String),
}

impl HourInput {
    fn resolve(&self) -> Result<usize> {
        let hour = match self {
            Self::Number(hour) => Some(*hour),
            Self::Text(text) => text.trim().parse::<i64>().ok(),
        };
        hour.and_then(|hour| usize::try_from(hour).ok())
            .filter(|hour| *hour < HOURS_PER_DAY)
            .ok_or_else(|| {
                HeaterError::invalid_input(format!(
                    "hour {} should be a number between 0 and 23",
                    self
                ))
            })
    }
}

impl fmt::Display for HourInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(hour) => write!(f, "{hour}"),
            Self::Text(text) => write!(f, "`{text}`"),
        }
    }
}

impl From<u8> for HourInput {
    fn from(hour: u8) -> Self {
        Self::Number(i64::from(hour))
    }
}

impl From<&str> for HourInput {
    fn from(hour: &str) -> Self {
        Self::Text(hour.to_string())
    }
}

/// A weekly 7x24 table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawSchedule")]
pub struct ProgramSchedule {
    days: [[ScheduleCell; HOURS_PER_DAY]; DAYS_PER_WEEK],
}

type RawSchedule = BTreeMap<String, BTreeMap<String, ScheduleCell>>;

impl ProgramSchedule {
    pub fn filled(cell: ScheduleCell) -> Self {
        Self {
            days: [[cell; HOURS_PER_DAY]; DAYS_PER_WEEK],
        }
    }

    /// Built-in program: heat on weekday mornings and evenings, most of the
    /// day at weekends, and keep 16 °C overnight.
    pub fn example() -> Self {
        let mut schedule = Self::filled(ScheduleCell::Flag(false));
        for day in DayOfWeek::ALL {
            let weekend = matches!(day, DayOfWeek::Sat | DayOfWeek::Sun);
            for hour in 0..HOURS_PER_DAY {
                let cell = match hour {
                    0..=5 => ScheduleCell::Override(16.0),
                    6..=8 => ScheduleCell::Flag(true),
                    9..=16 => ScheduleCell::Flag(weekend),
                    17..=22 => ScheduleCell::Flag(true),
                    _ => ScheduleCell::Override(16.0),
                };
                schedule.days[day.index()][hour] = cell;
            }
        }
        schedule
    }

    pub fn value_at(&self, day: DayOfWeek, hour: u32) -> ScheduleCell {
        self.days[day.index()][hour as usize % HOURS_PER_DAY]
    }

    pub fn value_for(&self, now: &NaiveDateTime) -> ScheduleCell {
        self.value_at(DayOfWeek::from_chrono(now.weekday()), now.hour())
    }

    fn set(&mut self, day: DayOfWeek, hour: usize, cell: ScheduleCell) {
        self.days[day.index()][hour] = cell;
    }
}

impl Serialize for ProgramSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        struct DayRow<'a>(&'a [ScheduleCell; HOURS_PER_DAY]);

        impl Serialize for DayRow<'_> {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(HOURS_PER_DAY))?;
                for (hour, cell) in self.0.iter().enumerate() {
                    map.serialize_entry(&hour.to_string(), cell)?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(DAYS_PER_WEEK))?;
        for day in DayOfWeek::ALL {
            map.serialize_entry(day.name(), &DayRow(&self.days[day.index()]))?;
        }
        map.end()
    }
}

impl TryFrom<RawSchedule> for ProgramSchedule {
    type Error = HeaterError;

    fn try_from(raw: RawSchedule) -> Result<Self> {
        let mut grid: [[Option<ScheduleCell>; HOURS_PER_DAY]; DAYS_PER_WEEK] =
            [[None; HOURS_PER_DAY]; DAYS_PER_WEEK];
        let mut seen = [false; DAYS_PER_WEEK];

        for (day_name, hours) in raw {
            let day = DayOfWeek::parse(&day_name)
                .ok_or_else(|| HeaterError::invalid_input(format!("unknown day `{day_name}`")))?;
            if std::mem::replace(&mut seen[day.index()], true) {
                return Err(HeaterError::invalid_input(format!("day `{day}` listed twice")));
            }

            for (hour_key, cell) in hours {
                let hour = HourInput::Text(hour_key).resolve()?;
                if grid[day.index()][hour].replace(cell.validate()?).is_some() {
                    return Err(HeaterError::invalid_input(format!(
                        "{day} lists hour {hour} twice"
                    )));
                }
            }
        }

        let mut schedule = Self::filled(ScheduleCell::default());
        for day in DayOfWeek::ALL {
            for hour in 0..HOURS_PER_DAY {
                let cell = grid[day.index()][hour].ok_or_else(|| {
                    HeaterError::invalid_input(format!("{day} is missing hour {hour}"))
                })?;
                schedule.set(day, hour, cell);
            }
        }
        Ok(schedule)
    }
}

/// Where `ProgramBook::add` takes the new table from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewProgram {
    Example,
    CopyOf(ProgramId),
}

/// Every stored program, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "RawBook")]
pub struct ProgramBook {
    programs: BTreeMap<ProgramId, ProgramSchedule>,
}

// Keys stay text until parsed so "0" and "00" cannot silently collapse.
type RawBook = BTreeMap<String, ProgramSchedule>;

impl Serialize for ProgramBook {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.programs.serialize(serializer)
    }
}

impl TryFrom<RawBook> for ProgramBook {
    type Error = HeaterError;

    fn try_from(raw: RawBook) -> Result<Self> {
        let mut programs = BTreeMap::new();
        for (key, schedule) in raw {
            let id = key.parse::<ProgramId>()?;
            if programs.insert(id, schedule).is_some() {
                return Err(HeaterError::invalid_input(format!(
                    "program {id} listed twice"
                )));
            }
        }
        Ok(Self { programs })
    }
}

impl ProgramBook {
    /// Book written when no program document exists yet.
    pub fn seeded() -> Self {
        let mut programs = BTreeMap::new();
        programs.insert(ProgramId::default(), ProgramSchedule::example());
        Self { programs }
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn get(&self, id: ProgramId) -> Result<&ProgramSchedule> {
        self.programs
            .get(&id)
            .ok_or(HeaterError::ProgramNotFound(id))
    }

    pub fn ids(&self) -> Vec<ProgramId> {
        self.programs.keys().copied().collect()
    }

    /// Sets `value` on every (day, hour) pair. Nothing changes unless the
    /// whole request is valid.
    pub fn edit<D: AsRef<str>>(
        &mut self,
        id: ProgramId,
        days: &[D],
        hours: &[HourInput],
        value: ScheduleCell,
    ) -> Result<()> {
        if days.is_empty() {
            return Err(HeaterError::invalid_input("at least one day is required"));
        }
        if hours.is_empty() {
            return Err(HeaterError::invalid_input("at least one hour is required"));
        }

        let days = days
            .iter()
            .map(|raw| {
                let raw = raw.as_ref();
                DayOfWeek::parse(raw).ok_or_else(|| {
                    HeaterError::invalid_input(format!(
                        "`{raw}` is not a day of the week (English, case insensitive)"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let hours = hours
            .iter()
            .map(HourInput::resolve)
            .collect::<Result<Vec<_>>>()?;
        let value = value.validate()?;

        let program = self
            .programs
            .get_mut(&id)
            .ok_or(HeaterError::ProgramNotFound(id))?;
        for day in &days {
            for hour in &hours {
                program.set(*day, *hour, value);
            }
        }
        Ok(())
    }

    /// Inserts a program under the next free id and returns that id.
    pub fn add(&mut self, source: NewProgram) -> Result<ProgramId> {
        let schedule = match source {
            NewProgram::Example => ProgramSchedule::example(),
            NewProgram::CopyOf(from) => self.get(from)?.clone(),
        };
        let id = self
            .programs
            .keys()
            .next_back()
            .map(|latest| latest.next())
            .unwrap_or_default();
        self.programs.insert(id, schedule);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn local_time(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn day_names_parse_loosely() {
        assert_eq!(DayOfWeek::parse("Monday"), Some(DayOfWeek::Mon));
        assert_eq!(DayOfWeek::parse(" SATUR DAY "), Some(DayOfWeek::Sat));
        assert_eq!(DayOfWeek::parse("mon"), None);
        assert_eq!(DayOfWeek::parse("funday"), None);
    }

    #[test]
    fn looks_up_cell_for_wall_clock_time() {
        let mut schedule = ProgramSchedule::filled(ScheduleCell::Flag(false));
        schedule.set(DayOfWeek::Mon, 8, ScheduleCell::Override(18.0));

        // Jan 5, 2026 is Monday.
        assert_eq!(
            schedule.value_for(&local_time(5, 8, 59)),
            ScheduleCell::Override(18.0)
        );
        assert_eq!(
            schedule.value_for(&local_time(5, 9, 0)),
            ScheduleCell::Flag(false)
        );
        assert_eq!(
            schedule.value_for(&local_time(6, 8, 0)),
            ScheduleCell::Flag(false)
        );
    }

    #[test]
    fn program_id_accepts_strings_and_integers() {
        let from_str: ProgramId = serde_json::from_str(r#""12""#).unwrap();
        let from_int: ProgramId = serde_json::from_str("12").unwrap();

        assert_eq!(from_str, ProgramId::new(12));
        assert_eq!(from_int, ProgramId::new(12));
        assert_eq!(serde_json::to_string(&from_int).unwrap(), r#""12""#);
        assert!(serde_json::from_str::<ProgramId>("-1").is_err());
        assert!(serde_json::from_str::<ProgramId>(r#""two""#).is_err());
    }

    #[test]
    fn cells_decode_as_flag_or_override() {
        let cells: Vec<ScheduleCell> = serde_json::from_str("[true, false, 18, 17.5]").unwrap();

        assert_eq!(
            cells,
            vec![
                ScheduleCell::Flag(true),
                ScheduleCell::Flag(false),
                ScheduleCell::Override(18.0),
                ScheduleCell::Override(17.5),
            ]
        );
    }

    #[test]
    fn program_document_keeps_numeric_id_order() {
        let mut book = ProgramBook::seeded();
        for _ in 0..10 {
            book.add(NewProgram::Example).unwrap();
        }

        let raw = serde_json::to_string(&book).unwrap();
        let decoded: ProgramBook = serde_json::from_str(&raw).unwrap();

        assert_eq!(decoded, book);
        assert_eq!(decoded.ids().last(), Some(&ProgramId::new(10)));
        assert_eq!(decoded.ids()[2], ProgramId::new(2));
    }

    #[test]
    fn rejects_table_with_missing_hour() {
        let mut raw = serde_json::to_value(ProgramSchedule::example()).unwrap();
        raw["friday"].as_object_mut().unwrap().remove("13");

        let err = serde_json::from_value::<ProgramSchedule>(raw).unwrap_err();
        assert!(err.to_string().contains("friday is missing hour 13"));
    }

    #[test]
    fn rejects_unknown_day_and_hour_keys() {
        let mut raw = serde_json::to_value(ProgramSchedule::example()).unwrap();
        raw["caturday"] = raw["monday"].clone();
        assert!(serde_json::from_value::<ProgramSchedule>(raw).is_err());

        let mut raw = serde_json::to_value(ProgramSchedule::example()).unwrap();
        raw["monday"]["24"] = serde_json::Value::Bool(true);
        assert!(serde_json::from_value::<ProgramSchedule>(raw).is_err());
    }

    #[test]
    fn rejects_ids_that_collapse_to_the_same_program() {
        let example = serde_json::to_value(ProgramSchedule::example()).unwrap();
        let raw = serde_json::json!({"0": example.clone(), "00": example});

        let err = serde_json::from_value::<ProgramBook>(raw).unwrap_err();
        assert!(err.to_string().contains("program 0 listed twice"));
    }

    #[test]
    fn rejects_hour_listed_twice() {
        let mut raw = serde_json::to_value(ProgramSchedule::example()).unwrap();
        raw["monday"]["07"] = serde_json::Value::Bool(false);

        let err = serde_json::from_value::<ProgramSchedule>(raw).unwrap_err();
        assert!(err.to_string().contains("monday lists hour 7 twice"));
    }

    #[test]
    fn unknown_program_is_not_defaulted() {
        let book = ProgramBook::seeded();

        assert!(book.get(ProgramId::new(0)).is_ok());
        assert!(matches!(
            book.get(ProgramId::new(7)),
            Err(HeaterError::ProgramNotFound(id)) if id == ProgramId::new(7)
        ));
    }

    #[test]
    fn edit_sets_every_requested_slot() {
        let mut book = ProgramBook::seeded();
        let hours = [HourInput::from(6), HourInput::from("7")];

        book.edit(
            ProgramId::new(0),
            &["Tuesday", "thursday"],
            &hours,
            ScheduleCell::Override(21.0),
        )
        .unwrap();

        let program = book.get(ProgramId::new(0)).unwrap();
        assert_eq!(
            program.value_at(DayOfWeek::Tue, 6),
            ScheduleCell::Override(21.0)
        );
        assert_eq!(
            program.value_at(DayOfWeek::Thu, 7),
            ScheduleCell::Override(21.0)
        );
        assert_eq!(
            program.value_at(DayOfWeek::Wed, 6),
            ProgramSchedule::example().value_at(DayOfWeek::Wed, 6)
        );
    }

    #[test]
    fn invalid_edit_changes_nothing() {
        let mut book = ProgramBook::seeded();
        let before = book.clone();
        let id = ProgramId::new(0);

        let bad_hour = [HourInput::from(5), HourInput::from(24)];
        assert!(matches!(
            book.edit(id, &["monday"], &bad_hour, ScheduleCell::Flag(true)),
            Err(HeaterError::InvalidScheduleInput(_))
        ));

        let hours = [HourInput::from("noon")];
        assert!(book
            .edit(id, &["monday"], &hours, ScheduleCell::Flag(true))
            .is_err());

        let hours = [HourInput::from(5)];
        assert!(book
            .edit(id, &["monday", "someday"], &hours, ScheduleCell::Flag(true))
            .is_err());
        assert!(book
            .edit(id, &["monday"], &hours, ScheduleCell::Override(f64::NAN))
            .is_err());
        assert!(book
            .edit::<&str>(id, &[], &hours, ScheduleCell::Flag(true))
            .is_err());
        assert!(matches!(
            book.edit(ProgramId::new(9), &["monday"], &hours, ScheduleCell::Flag(true)),
            Err(HeaterError::ProgramNotFound(_))
        ));

        assert_eq!(book, before);
    }

    #[test]
    fn add_uses_next_id_and_copies_source() {
        let mut book = ProgramBook::seeded();
        let hours = [HourInput::from(3)];
        book.edit(
            ProgramId::new(0),
            &["sunday"],
            &hours,
            ScheduleCell::Flag(true),
        )
        .unwrap();

        let copy = book.add(NewProgram::CopyOf(ProgramId::new(0))).unwrap();
        let fresh = book.add(NewProgram::Example).unwrap();

        assert_eq!(copy, ProgramId::new(1));
        assert_eq!(fresh, ProgramId::new(2));
        assert_eq!(
            book.get(copy).unwrap().value_at(DayOfWeek::Sun, 3),
            ScheduleCell::Flag(true)
        );
        assert_eq!(book.get(fresh).unwrap(), &ProgramSchedule::example());
        assert!(matches!(
            book.add(NewProgram::CopyOf(ProgramId::new(40))),
            Err(HeaterError::ProgramNotFound(_))
        ));
    }
}
