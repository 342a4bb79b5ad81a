//! Cascading writes against in-memory and file SQLite databases.

use std::path::PathBuf;

use relmap::prelude::*;
use relmap_sqlite::SqliteConnection;

// ----------------------------------------------------------------------------
// Entities
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
struct Team {
    id: i64,
    name: String,
    heroes: RelationList<Hero>,
}

impl Entity for Team {
    fn define(def: &mut EntityDef<Self>) {
        def.generated(GenerationStrategy::Identity);
        def.column("id", |t| &t.id, |t| &mut t.id).primary_key();
        def.column("name", |t| &t.name, |t| &mut t.name);
        def.one_to_many("heroes", "team_id", |t| &t.heroes, |t| &mut t.heroes)
            .cascade_delete();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Hero {
    id: i64,
    name: String,
    team: Ref<Team>,
}

impl Entity for Hero {
    fn define(def: &mut EntityDef<Self>) {
        def.generated(GenerationStrategy::Identity);
        def.column("id", |h| &h.id, |h| &mut h.id).primary_key();
        def.column("name", |h| &h.name, |h| &mut h.name);
        def.reference("team", |h| &h.team, |h| &mut h.team);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Club {
    id: i64,
    name: String,
    members: RelationList<Member>,
}

impl Entity for Club {
    fn define(def: &mut EntityDef<Self>) {
        def.column("id", |c| &c.id, |c| &mut c.id).primary_key();
        def.column("name", |c| &c.name, |c| &mut c.name);
        def.one_to_many("members", "club_id", |c| &c.members, |c| &mut c.members);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Member {
    id: i64,
    name: String,
    club: Ref<Club>,
}

impl Entity for Member {
    fn define(def: &mut EntityDef<Self>) {
        def.column("id", |m| &m.id, |m| &mut m.id).primary_key();
        def.column("name", |m| &m.name, |m| &mut m.name);
        def.reference("club", |m| &m.club, |m| &mut m.club);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Student {
    id: i64,
    name: String,
    courses: RelationSet<Course>,
}

impl Entity for Student {
    fn define(def: &mut EntityDef<Self>) {
        def.column("id", |s| &s.id, |s| &mut s.id).primary_key();
        def.column("name", |s| &s.name, |s| &mut s.name);
        def.many_to_many(
            "courses",
            JoinTable::new("student_course", "student_id", "course_id"),
            |s| &s.courses,
            |s| &mut s.courses,
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Course {
    id: i64,
    title: String,
}

impl Entity for Course {
    fn define(def: &mut EntityDef<Self>) {
        def.column("id", |c| &c.id, |c| &mut c.id).primary_key();
        def.column("title", |c| &c.title, |c| &mut c.title);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Playlist {
    id: i64,
    songs: RelationList<Song>,
}

impl Entity for Playlist {
    fn define(def: &mut EntityDef<Self>) {
        def.column("id", |p| &p.id, |p| &mut p.id).primary_key();
        def.one_to_many_via(
            "songs",
            JoinTable::new("playlist_song", "playlist_id", "song_id"),
            |p| &p.songs,
            |p| &mut p.songs,
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Song {
    id: i64,
    title: String,
}

impl Entity for Song {
    fn define(def: &mut EntityDef<Self>) {
        def.column("id", |s| &s.id, |s| &mut s.id).primary_key();
        def.column("title", |s| &s.title, |s| &mut s.title);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Alpha {
    id: i64,
    beta: Ref<Beta>,
}

impl Entity for Alpha {
    fn define(def: &mut EntityDef<Self>) {
        def.column("id", |a| &a.id, |a| &mut a.id).primary_key();
        def.reference("beta", |a| &a.beta, |a| &mut a.beta);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Beta {
    id: i64,
    alpha: Ref<Alpha>,
}

impl Entity for Beta {
    fn define(def: &mut EntityDef<Self>) {
        def.column("id", |b| &b.id, |b| &mut b.id).primary_key();
        def.reference("alpha", |b| &b.alpha, |b| &mut b.alpha);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Keeper {
    id: i64,
    name: String,
    pet: Ref<Pet>,
}

impl Entity for Keeper {
    fn define(def: &mut EntityDef<Self>) {
        def.generated(GenerationStrategy::Identity);
        def.column("id", |k| &k.id, |k| &mut k.id).primary_key();
        def.column("name", |k| &k.name, |k| &mut k.name);
        def.reference("pet", |k| &k.pet, |k| &mut k.pet).cascade_delete();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Pet {
    id: i64,
    name: String,
}

impl Entity for Pet {
    fn define(def: &mut EntityDef<Self>) {
        def.generated(GenerationStrategy::Identity);
        def.column("id", |p| &p.id, |p| &mut p.id).primary_key();
        def.column("name", |p| &p.name, |p| &mut p.name);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Ping {
    id: i64,
    pong: Ref<Pong>,
}

impl Entity for Ping {
    fn define(def: &mut EntityDef<Self>) {
        def.generated(GenerationStrategy::Identity);
        def.column("id", |l| &l.id, |l| &mut l.id).primary_key();
        def.reference("pong", |l| &l.pong, |l| &mut l.pong);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Pong {
    id: i64,
    ping: Ref<Ping>,
}

impl Entity for Pong {
    fn define(def: &mut EntityDef<Self>) {
        def.sequence("pong_seq");
        def.column("id", |r| &r.id, |r| &mut r.id).primary_key();
        def.reference("ping", |r| &r.ping, |r| &mut r.ping);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Employee {
    id: i64,
    name: String,
    manager: Ref<Employee>,
}

impl Entity for Employee {
    fn define(def: &mut EntityDef<Self>) {
        def.generated(GenerationStrategy::Identity);
        def.column("id", |e| &e.id, |e| &mut e.id).primary_key();
        def.column("name", |e| &e.name, |e| &mut e.name);
        def.reference("manager", |e| &e.manager, |e| &mut e.manager);
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn memory_session() -> Session<SqliteConnection> {
    SessionBuilder::new().build(SqliteConnection::open_memory().expect("open sqlite memory db"))
}

/// A database file removed again when the guard drops.
struct TempDb(PathBuf);

impl TempDb {
    fn new(name: &str) -> Self {
        let path =
            std::env::temp_dir().join(format!("relmap-{}-{}.db", name, std::process::id()));
        let _ = std::fs::remove_file(&path);
        Self(path)
    }

    fn session(&self) -> Session<SqliteConnection> {
        let conn = SqliteConnection::open_file(self.0.to_string_lossy().into_owned())
            .expect("open sqlite file db");
        SessionBuilder::new().build(conn)
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn hero(name: &str) -> Hero {
    Hero {
        name: name.to_string(),
        ..Default::default()
    }
}

fn member(id: i64, name: &str) -> Member {
    Member {
        id,
        name: name.to_string(),
        ..Default::default()
    }
}

fn course(id: i64, title: &str) -> Course {
    Course {
        id,
        title: title.to_string(),
    }
}

fn scalar(session: &Session<SqliteConnection>, sql: &str, params: &[Value]) -> Option<i64> {
    let rows = session.query_raw(sql, params).expect("raw query");
    rows.first().and_then(|row| row.get(0)).and_then(Value::as_i64)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[test]
fn merge_twice_keeps_one_row_and_the_same_key() {
    let session = memory_session();
    let mut team = Team {
        name: "Avengers".to_string(),
        heroes: RelationList::from_vec(vec![hero("Thor"), hero("Hulk")]),
        ..Default::default()
    };

    session.merge(&mut team).unwrap();
    let id = team.id;
    assert!(id > 0);
    session.merge(&mut team).unwrap();

    assert_eq!(team.id, id);
    assert_eq!(session.from::<Team>().count().unwrap(), 1);
    assert_eq!(session.from::<Hero>().count().unwrap(), 2);

    let found = session.find::<Team>(id).unwrap().unwrap();
    assert_eq!(found.name, "Avengers");
    let heroes = team.heroes.peek().unwrap();
    assert!(heroes.iter().all(|h| h.id > 0));
}

#[test]
fn insert_writes_generated_child_keys_and_links() {
    let session = memory_session();
    let mut team = Team {
        name: "Defenders".to_string(),
        heroes: RelationList::from_vec(vec![hero("Luke"), hero("Jessica")]),
        ..Default::default()
    };
    session.insert(&mut team).unwrap();

    let linked = scalar(
        &session,
        "SELECT COUNT(*) FROM \"hero\" WHERE \"team_id\" = ?1",
        &[Value::BigInt(team.id)],
    );
    assert_eq!(linked, Some(2));

    let mut loaded = session.find::<Team>(team.id).unwrap().unwrap();
    assert!(!loaded.heroes.is_loaded());
    let names: Vec<String> = loaded
        .heroes
        .iter()
        .unwrap()
        .map(|h| h.name.clone())
        .collect();
    assert_eq!(names, vec!["Luke", "Jessica"]);
}

#[test]
fn reference_target_is_saved_before_its_owner() {
    let session = memory_session();
    let mut thor = Hero {
        name: "Thor".to_string(),
        team: Ref::new(Team {
            name: "Asgard".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };
    session.insert(&mut thor).unwrap();

    let team_id = thor.team.peek().map(|t| t.id).unwrap();
    assert!(team_id > 0);
    assert_eq!(thor.team.key().and_then(Value::as_i64), Some(team_id));

    let mut found = session.find::<Hero>(thor.id).unwrap().unwrap();
    let team = found.team.get().unwrap().unwrap();
    assert_eq!(team.name, "Asgard");
}

#[test]
fn mutual_references_terminate() {
    let session = memory_session();
    let mut alpha = Alpha {
        id: 1,
        beta: Ref::new(Beta {
            id: 2,
            alpha: Ref::new(Alpha {
                id: 1,
                beta: Ref::empty(),
            }),
        }),
    };
    session.insert(&mut alpha).unwrap();

    assert_eq!(session.from::<Alpha>().count().unwrap(), 1);
    assert_eq!(session.from::<Beta>().count().unwrap(), 1);
    assert_eq!(scalar(&session, "SELECT \"beta_id\" FROM \"alpha\"", &[]), Some(2));
    assert_eq!(scalar(&session, "SELECT \"alpha_id\" FROM \"beta\"", &[]), Some(1));

    let mut found = session.find::<Alpha>(1).unwrap().unwrap();
    let beta = found.beta.get().unwrap().unwrap();
    assert_eq!(beta.alpha.key().and_then(Value::as_i64), Some(1));
}

#[test]
fn mutual_references_with_generated_keys_insert_once() {
    let session = memory_session();
    let mut ping = Ping {
        pong: Ref::new(Pong {
            ping: Ref::new(Ping::default()),
            ..Default::default()
        }),
        ..Default::default()
    };
    session.insert(&mut ping).unwrap();

    assert_eq!(session.from::<Ping>().count().unwrap(), 1);
    assert_eq!(session.from::<Pong>().count().unwrap(), 1);
    let pong_id = ping.pong.peek().map(|p| p.id).unwrap();
    assert!(ping.id > 0);
    assert!(pong_id > 0);
    assert_eq!(
        scalar(&session, "SELECT \"pong_id\" FROM \"ping\"", &[]),
        Some(pong_id)
    );
    assert_eq!(
        scalar(&session, "SELECT \"ping_id\" FROM \"pong\"", &[]),
        Some(ping.id)
    );
}

#[test]
fn new_reference_of_the_same_type_is_a_separate_row() {
    let session = memory_session();
    let mut clerk = Employee {
        name: "Bob".to_string(),
        manager: Ref::new(Employee {
            name: "Alice".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };
    session.insert(&mut clerk).unwrap();

    assert_eq!(session.from::<Employee>().count().unwrap(), 2);
    let manager_id = clerk.manager.peek().map(|m| m.id).unwrap();
    assert_ne!(manager_id, clerk.id);
    let mut found = session.find::<Employee>(clerk.id).unwrap().unwrap();
    assert_eq!(found.manager.get().unwrap().map(|m| m.name.clone()), Some("Alice".to_string()));
}

#[test]
fn cascade_delete_follows_references() {
    let session = memory_session();
    let mut keeper = Keeper {
        name: "Sam".to_string(),
        pet: Ref::new(Pet {
            name: "Rex".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };
    session.insert(&mut keeper).unwrap();
    let mut other = Keeper {
        name: "Jo".to_string(),
        pet: Ref::new(Pet {
            name: "Tom".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };
    session.insert(&mut other).unwrap();
    assert_eq!(session.from::<Pet>().count().unwrap(), 2);

    // Target held in memory
    session.delete(&mut keeper).unwrap();
    assert_eq!(session.from::<Pet>().count().unwrap(), 1);

    // Target only known by its stored key
    let mut found = session.find::<Keeper>(other.id).unwrap().unwrap();
    assert!(!found.pet.is_loaded());
    session.delete(&mut found).unwrap();
    assert_eq!(session.from::<Keeper>().count().unwrap(), 0);
    assert_eq!(session.from::<Pet>().count().unwrap(), 0);
}

#[test]
fn cascade_delete_removes_children() {
    let session = memory_session();
    let mut team = Team {
        name: "Inhumans".to_string(),
        heroes: RelationList::from_vec(vec![hero("Black Bolt"), hero("Medusa")]),
        ..Default::default()
    };
    session.insert(&mut team).unwrap();

    let mut loaded = session.find::<Team>(team.id).unwrap().unwrap();
    session.delete(&mut loaded).unwrap();

    assert_eq!(session.from::<Team>().count().unwrap(), 0);
    assert_eq!(session.from::<Hero>().count().unwrap(), 0);
}

#[test]
fn delete_without_cascade_severs_children() {
    let session = memory_session();
    let mut club = Club {
        id: 7,
        name: "Chess".to_string(),
        members: RelationList::from_vec(vec![member(1, "Ana"), member(2, "Bo")]),
    };
    session.insert(&mut club).unwrap();
    assert_eq!(
        scalar(&session, "SELECT COUNT(*) FROM \"member\" WHERE \"club_id\" = ?1", &[Value::BigInt(7)]),
        Some(2)
    );

    session.delete(&mut club).unwrap();

    assert_eq!(session.from::<Club>().count().unwrap(), 0);
    assert_eq!(session.from::<Member>().count().unwrap(), 2);
    assert_eq!(
        scalar(&session, "SELECT COUNT(*) FROM \"member\" WHERE \"club_id\" IS NULL", &[]),
        Some(2)
    );
}

#[test]
fn attached_collection_changes_apply_immediately() {
    let session = memory_session();
    let mut club = Club {
        id: 1,
        name: "Go".to_string(),
        members: RelationList::from_vec(vec![member(1, "Cy"), member(2, "Di")]),
    };
    session.insert(&mut club).unwrap();

    let mut loaded = session.find::<Club>(1).unwrap().unwrap();
    let cy = loaded.members.get(0).unwrap().cloned().unwrap();
    assert!(loaded.members.remove(&cy).unwrap());
    loaded.members.add(member(3, "Ed")).unwrap();

    let mut member_cy = session.find::<Member>(1).unwrap().unwrap();
    assert!(member_cy.club.key().is_none());
    assert!(member_cy.club.get().unwrap().is_none());

    let mut again = session.find::<Club>(1).unwrap().unwrap();
    let names: Vec<String> = again.members.iter().unwrap().map(|m| m.name.clone()).collect();
    assert_eq!(names, vec!["Di", "Ed"]);
}

#[test]
fn attached_removal_deletes_under_cascade() {
    let session = memory_session();
    let mut team = Team {
        name: "X-Men".to_string(),
        heroes: RelationList::from_vec(vec![hero("Storm"), hero("Rogue")]),
        ..Default::default()
    };
    session.insert(&mut team).unwrap();

    let mut loaded = session.find::<Team>(team.id).unwrap().unwrap();
    let storm = loaded.heroes.get(0).unwrap().cloned().unwrap();
    loaded.heroes.remove(&storm).unwrap();

    assert_eq!(session.from::<Hero>().count().unwrap(), 1);
    assert!(session.find::<Hero>(storm.id).unwrap().is_none());
}

#[test]
fn many_to_many_links_through_join_table() {
    let session = memory_session();
    let mut student = Student {
        id: 1,
        name: "Kim".to_string(),
        courses: RelationSet::from_vec(vec![course(10, "Algebra"), course(11, "Botany")]),
    };
    session.insert(&mut student).unwrap();
    session.merge(&mut student).unwrap();

    assert_eq!(scalar(&session, "SELECT COUNT(*) FROM \"student_course\"", &[]), Some(2));
    assert_eq!(session.from::<Course>().count().unwrap(), 2);

    let mut loaded = session.find::<Student>(1).unwrap().unwrap();
    assert_eq!(loaded.courses.len().unwrap(), 2);
    assert!(loaded.courses.contains(&course(11, "Botany")).unwrap());

    session.delete(&mut loaded).unwrap();
    assert_eq!(scalar(&session, "SELECT COUNT(*) FROM \"student_course\"", &[]), Some(0));
    assert_eq!(session.from::<Course>().count().unwrap(), 2);
}

#[test]
fn one_to_many_through_join_table() {
    let session = memory_session();
    let mut playlist = Playlist {
        id: 3,
        songs: RelationList::from_vec(vec![
            Song {
                id: 2,
                title: "Second".to_string(),
            },
            Song {
                id: 1,
                title: "First".to_string(),
            },
        ]),
    };
    session.insert(&mut playlist).unwrap();

    let mut loaded = session.find::<Playlist>(3).unwrap().unwrap();
    let titles: Vec<String> = loaded.songs.iter().unwrap().map(|s| s.title.clone()).collect();
    assert_eq!(titles, vec!["First", "Second"]);

    session.delete(&mut loaded).unwrap();
    assert_eq!(scalar(&session, "SELECT COUNT(*) FROM \"playlist_song\"", &[]), Some(0));
    assert_eq!(session.from::<Song>().count().unwrap(), 2);
}

#[test]
fn detached_changes_replay_on_merge() {
    let db = TempDb::new("delta-replay");
    let x = course(1, "Xenology");
    let y = course(2, "Yachting");
    let z = course(3, "Zoology");

    let mut detached = {
        let session = db.session();
        let mut student = Student {
            id: 5,
            name: "Lee".to_string(),
            courses: RelationSet::from_vec(vec![x.clone(), y.clone()]),
        };
        session.insert(&mut student).unwrap();

        let mut loaded = session.find::<Student>(5).unwrap().unwrap();
        assert_eq!(loaded.courses.len().unwrap(), 2);
        session.close().unwrap();
        loaded
    };

    assert!(!detached.courses.is_attached());
    assert!(detached.courses.add(z.clone()).unwrap());
    assert!(detached.courses.remove(&x).unwrap());
    assert!(detached.courses.has_pending_changes());

    let session = db.session();
    detached.courses.merge(&session).unwrap();
    assert!(!detached.courses.has_pending_changes());
    assert!(detached.courses.is_attached());

    let mut reloaded = session.find::<Student>(5).unwrap().unwrap();
    let mut ids: Vec<i64> = reloaded.courses.iter().unwrap().map(|c| c.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 3]);
    assert_eq!(
        scalar(
            &session,
            "SELECT COUNT(*) FROM \"student_course\" WHERE \"course_id\" = ?1",
            &[Value::BigInt(1)]
        ),
        Some(0)
    );
    assert!(session.find::<Course>(1).unwrap().is_some());
}

#[test]
fn update_replays_buffered_collection_changes() {
    let session = memory_session();
    let mut club = Club {
        id: 9,
        name: "Bridge".to_string(),
        members: RelationList::from_vec(vec![member(1, "Fay"), member(2, "Gus")]),
    };
    session.insert(&mut club).unwrap();

    // A detached copy with the same key and its own buffered changes
    let mut copy = Club {
        id: 9,
        name: "Bridge & Whist".to_string(),
        members: RelationList::from_vec(vec![member(1, "Fay"), member(2, "Gus")]),
    };
    copy.members.remove(&member(1, "Fay")).unwrap();
    copy.members.add(member(3, "Hal")).unwrap();
    session.update(&mut copy).unwrap();

    let mut loaded = session.find::<Club>(9).unwrap().unwrap();
    assert_eq!(loaded.name, "Bridge & Whist");
    let names: Vec<String> = loaded.members.iter().unwrap().map(|m| m.name.clone()).collect();
    assert_eq!(names, vec!["Gus", "Hal"]);
    assert_eq!(session.from::<Member>().count().unwrap(), 3);
}

#[test]
fn merging_an_unowned_collection_fails() {
    let session = memory_session();
    let mut songs = RelationList::from_vec(vec![Song {
        id: 1,
        title: "Orphan".to_string(),
    }]);
    let err = songs.merge(&session).unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));
}
