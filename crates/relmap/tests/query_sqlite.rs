//! Typed queries compiled and run against in-memory SQLite.

use chrono::NaiveDate;
use relmap::prelude::*;
use relmap::{Col, Direction, Operand};
use relmap_sqlite::SqliteConnection;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Power {
    #[default]
    Strength,
    Flight,
    Magic,
}

impl SqlEnum for Power {
    fn name(&self) -> &'static str {
        match self {
            Power::Strength => "strength",
            Power::Flight => "flight",
            Power::Magic => "magic",
        }
    }

    fn ordinal(&self) -> i64 {
        match self {
            Power::Strength => 0,
            Power::Flight => 1,
            Power::Magic => 2,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "strength" => Some(Power::Strength),
            "flight" => Some(Power::Flight),
            "magic" => Some(Power::Magic),
            _ => None,
        }
    }

    fn from_ordinal(ordinal: i64) -> Option<Self> {
        match ordinal {
            0 => Some(Power::Strength),
            1 => Some(Power::Flight),
            2 => Some(Power::Magic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Team {
    id: i64,
    name: String,
}

impl Entity for Team {
    fn define(def: &mut EntityDef<Self>) {
        def.column("id", |t| &t.id, |t| &mut t.id).primary_key();
        def.column("name", |t| &t.name, |t| &mut t.name).unique();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Hero {
    id: i64,
    name: String,
    age: i32,
    power: Power,
    born: Option<NaiveDate>,
    team: Ref<Team>,
}

impl Entity for Hero {
    fn define(def: &mut EntityDef<Self>) {
        def.column("id", |h| &h.id, |h| &mut h.id).primary_key();
        def.column("name", |h| &h.name, |h| &mut h.name);
        def.column("age", |h| &h.age, |h| &mut h.age);
        def.enum_column("power", |h| &h.power, |h| &mut h.power);
        def.column("born", |h| &h.born, |h| &mut h.born);
        def.reference("team", |h| &h.team, |h| &mut h.team);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Dog {
    id: i64,
    name: String,
}

impl Entity for Dog {
    fn define(def: &mut EntityDef<Self>) {
        def.table("animal").discriminator("kind", "dog");
        def.column("id", |d| &d.id, |d| &mut d.id).primary_key();
        def.column("name", |d| &d.name, |d| &mut d.name);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Cat {
    id: i64,
    name: String,
}

impl Entity for Cat {
    fn define(def: &mut EntityDef<Self>) {
        def.table("animal").discriminator("kind", "cat");
        def.column("id", |c| &c.id, |c| &mut c.id).primary_key();
        def.column("name", |c| &c.name, |c| &mut c.name);
    }
}

fn session() -> Session<SqliteConnection> {
    SessionBuilder::new().build(SqliteConnection::open_memory().expect("open sqlite memory db"))
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Two teams and five heroes.
fn seeded() -> Session<SqliteConnection> {
    let session = session();
    let mut avengers = Team {
        id: 1,
        name: "Avengers".to_string(),
    };
    let mut villains = Team {
        id: 2,
        name: "Villains".to_string(),
    };
    session.insert(&mut avengers).unwrap();
    session.insert(&mut villains).unwrap();

    let rows = [
        (1, "Thor", 1500, Power::Strength, Some(date(1962, 8, 1)), Some(1)),
        (2, "Spider-Man", 17, Power::Strength, Some(date(1962, 8, 15)), Some(1)),
        (3, "Storm", 35, Power::Flight, Some(date(1975, 5, 1)), Some(1)),
        (4, "Loki", 1050, Power::Magic, Some(date(1949, 8, 1)), Some(2)),
        (5, "Sentry", 40, Power::Flight, None, None),
    ];
    for (id, name, age, power, born, team) in rows {
        let mut hero = Hero {
            id,
            name: name.to_string(),
            age,
            power,
            born,
            team: team.map_or_else(Ref::empty, |key: i64| Ref::from_key(key)),
        };
        session.insert(&mut hero).unwrap();
    }
    session
}

fn names(heroes: &[Hero]) -> Vec<&str> {
    heroes.iter().map(|h| h.name.as_str()).collect()
}

#[test]
fn filter_order_and_limit() {
    let session = seeded();
    let heroes = session
        .from::<Hero>()
        .filter(col::<Hero>("age"))
        .gt(30)
        .order_by(col::<Hero>("name"))
        .select()
        .unwrap();
    assert_eq!(names(&heroes), vec!["Loki", "Sentry", "Storm", "Thor"]);

    let page = session
        .from::<Hero>()
        .order_by_desc(col::<Hero>("age"))
        .limit(2)
        .offset(1)
        .select()
        .unwrap();
    assert_eq!(names(&page), vec!["Loki", "Sentry"]);

    let skipped = session
        .from::<Hero>()
        .order_by(col::<Hero>("id"))
        .offset(3)
        .select()
        .unwrap();
    assert_eq!(names(&skipped), vec!["Loki", "Sentry"]);
}

#[test]
fn identical_builds_compile_identically() {
    let session = seeded();
    let build = || {
        session
            .from::<Hero>()
            .inner_join::<Team>()
            .on(col::<Hero>("team"))
            .is(col::<Team>("id"))
            .filter(col::<Team>("name"))
            .eq("Avengers")
            .and(col::<Hero>("age"))
            .between(18, 100)
            .order_by(col::<Hero>("name"))
            .compile_select()
            .unwrap()
    };
    let first = build();
    let second = build();
    assert_eq!(first.sql, second.sql);
    assert_eq!(first.params, second.params);
    assert_eq!(
        first.params,
        vec![Value::from("Avengers"), Value::Int(18), Value::Int(100)]
    );
}

#[test]
fn join_filters_on_the_joined_type() {
    let session = seeded();
    let heroes = session
        .from::<Hero>()
        .inner_join::<Team>()
        .on(col::<Hero>("team"))
        .is(col::<Team>("id"))
        .filter(col::<Team>("name"))
        .eq("Avengers")
        .and(col::<Hero>("name"))
        .like("S", LikeMode::Start)
        .order_by(col::<Hero>("id"))
        .select()
        .unwrap();
    assert_eq!(names(&heroes), vec!["Spider-Man", "Storm"]);

    let everyone = session
        .from::<Hero>()
        .left_join::<Team>()
        .on(col::<Hero>("team"))
        .is(col::<Team>("id"))
        .count()
        .unwrap();
    assert_eq!(everyone, 5);
}

#[test]
fn predicates_cover_null_range_and_membership() {
    let session = seeded();

    let teamless = session
        .from::<Hero>()
        .filter(col::<Hero>("team"))
        .is_null()
        .select()
        .unwrap();
    assert_eq!(names(&teamless), vec!["Sentry"]);

    let in_range = session
        .from::<Hero>()
        .filter(col::<Hero>("age"))
        .between(17, 40)
        .order_by(col::<Hero>("age"))
        .select()
        .unwrap();
    assert_eq!(names(&in_range), vec!["Spider-Man", "Storm", "Sentry"]);

    let picked = session
        .from::<Hero>()
        .filter(col::<Hero>("id"))
        .in_list([1_i64, 4])
        .order_by(col::<Hero>("id"))
        .select()
        .unwrap();
    assert_eq!(names(&picked), vec!["Thor", "Loki"]);

    let none = session
        .from::<Hero>()
        .filter(col::<Hero>("id"))
        .in_list(Vec::<i64>::new())
        .count()
        .unwrap();
    assert_eq!(none, 0);

    let all = session
        .from::<Hero>()
        .filter(col::<Hero>("id"))
        .not_in(Vec::<i64>::new())
        .count()
        .unwrap();
    assert_eq!(all, 5);

    let older = session
        .from::<Hero>()
        .filter(col::<Hero>("born"))
        .lt(date(1960, 1, 1))
        .select()
        .unwrap();
    assert_eq!(names(&older), vec!["Loki"]);
    assert_eq!(older[0].born, Some(date(1949, 8, 1)));
}

#[test]
fn enum_and_entity_operands() {
    let session = seeded();
    let fliers = session
        .from::<Hero>()
        .filter(col::<Hero>("power"))
        .eq(Operand::variant(Power::Flight))
        .order_by(col::<Hero>("id"))
        .select()
        .unwrap();
    assert_eq!(names(&fliers), vec!["Storm", "Sentry"]);
    assert!(fliers.iter().all(|h| h.power == Power::Flight));

    let villains = session.find::<Team>(2_i64).unwrap().unwrap();
    let members = session
        .from::<Hero>()
        .filter(col::<Hero>("team"))
        .eq_entity(&villains)
        .select()
        .unwrap();
    assert_eq!(names(&members), vec!["Loki"]);
}

#[test]
fn grouped_projection_with_having() {
    let session = seeded();
    let rows = session
        .from::<Hero>()
        .filter(col::<Hero>("team"))
        .is_not_null()
        .group_by([col::<Hero>("team")])
        .having(Function::count_star())
        .gt(1)
        .order_by(col::<Hero>("team"))
        .select_rows([Operand::from(col::<Hero>("team")), Function::count_star().into()])
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0).and_then(Value::as_i64), Some(1));
    assert_eq!(rows[0].get(1).and_then(Value::as_i64), Some(3));

    let oldest = session
        .from::<Hero>()
        .select_rows([Function::max(&col::<Hero>("age"))])
        .unwrap();
    assert_eq!(oldest[0].get(0).and_then(Value::as_i64), Some(1500));
}

#[test]
fn first_and_distinct() {
    let session = seeded();
    let youngest = session
        .from::<Hero>()
        .order_by(col::<Hero>("age"))
        .select_first()
        .unwrap()
        .unwrap();
    assert_eq!(youngest.name, "Spider-Man");

    let nobody = session
        .from::<Hero>()
        .filter(col::<Hero>("name"))
        .eq("Nobody")
        .select_first()
        .unwrap();
    assert!(nobody.is_none());

    let distinct = session.from::<Hero>().select_distinct().unwrap();
    assert_eq!(distinct.len(), 5);
}

#[test]
fn bulk_update_and_delete() {
    let session = seeded();
    let updated = session
        .from::<Hero>()
        .filter(col::<Hero>("power"))
        .eq(Operand::variant(Power::Flight))
        .update([(col::<Hero>("age"), 50)])
        .unwrap();
    assert_eq!(updated, 2);
    let storm = session.find::<Hero>(3_i64).unwrap().unwrap();
    assert_eq!(storm.age, 50);

    let deleted = session
        .from::<Hero>()
        .inner_join::<Team>()
        .on(col::<Hero>("team"))
        .is(col::<Team>("id"))
        .filter(col::<Team>("name"))
        .eq("Villains")
        .delete()
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(session.find::<Hero>(4_i64).unwrap().is_none());
    assert_eq!(session.from::<Hero>().count().unwrap(), 4);

    let renamed = session
        .from::<Hero>()
        .inner_join::<Team>()
        .on(col::<Hero>("team"))
        .is(col::<Team>("id"))
        .filter(col::<Team>("name"))
        .eq("Avengers")
        .update([(col::<Hero>("name"), "Avenger")])
        .unwrap();
    assert_eq!(renamed, 3);
    assert_eq!(
        session
            .from::<Hero>()
            .filter(col::<Hero>("name"))
            .eq("Avenger")
            .count()
            .unwrap(),
        3
    );
}

#[test]
fn discriminator_scopes_every_statement() {
    let session = session();
    for (id, name) in [(1, "Rex"), (2, "Fido")] {
        let mut dog = Dog {
            id,
            name: name.to_string(),
        };
        session.insert(&mut dog).unwrap();
    }
    let mut cat = Cat {
        id: 3,
        name: "Tom".to_string(),
    };
    session.insert(&mut cat).unwrap();

    assert_eq!(session.from::<Dog>().count().unwrap(), 2);
    assert_eq!(session.from::<Cat>().count().unwrap(), 1);
    assert!(session.find::<Dog>(3_i64).unwrap().is_none());

    let compiled = session.from::<Cat>().compile_delete().unwrap();
    assert!(compiled.sql.contains("\"kind\""));
    assert_eq!(compiled.params, vec![Value::from("cat")]);

    let renamed = session
        .from::<Cat>()
        .update([(col::<Cat>("name"), "Garfield")])
        .unwrap();
    assert_eq!(renamed, 1);

    assert_eq!(session.from::<Dog>().delete().unwrap(), 2);
    let cats = session.from::<Cat>().select().unwrap();
    assert_eq!(
        cats,
        vec![Cat {
            id: 3,
            name: "Garfield".to_string()
        }]
    );
}

#[test]
fn mutation_errors_surface_as_illegal_state() {
    let session = seeded();
    let empty: [(Col<Hero>, i32); 0] = [];
    let err = session.from::<Hero>().update(empty).unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));

    let err = session
        .from::<Hero>()
        .filter(col::<Team>("name"))
        .eq("Avengers")
        .select()
        .unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));
}

#[test]
fn direction_renders_sql_keywords() {
    assert_eq!(Direction::Asc.as_sql(), "ASC");
    assert_eq!(Direction::Desc.as_sql(), "DESC");
}
