//! Typestate query builder.
//!
//! A query moves through stages:
//!
//! ```text
//! FROM -> [JOIN -> ON -> IS]* -> [WHERE chain] -> [GROUP BY] -> [HAVING chain]
//!      -> [ORDER BY]* -> terminal
//! ```
//!
//! Each stage is a marker type, so calls out of order do not compile: a join
//! must be finished with `on(..).is(..)`, and `update`/`delete` exist only on
//! the FROM and WHERE stages.
//!
//! Errors found while building (such as an entity operand without a mapping)
//! are held back and returned by the terminal.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use relmap_core::{
    Dialect, Entity, EntityMapping, EntityType, Error, QueryExecutor, Result, TypeHandle, Value,
};

use crate::compile::{CompiledQuery, Compiler, Direction, Projection, QueryParts};
use crate::condition::{Comparator, Condition, Connector, push_condition};
use crate::join::{JoinClause, JoinType};
use crate::operand::{Col, ColumnRef, LikeMode, Operand};

mod sealed {
    pub trait Sealed {}
}

/// Marker for a builder stage.
pub trait Stage: sealed::Sealed {}

/// Stages that accept condition chains.
pub trait ConditionStage: Stage {
    #[doc(hidden)]
    const HAVING: bool;
}

/// Stages from which `update` and `delete` are reachable.
pub trait Mutable: Stage {}

macro_rules! stages {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy)]
            pub struct $name;
            impl sealed::Sealed for $name {}
            impl Stage for $name {}
        )*
    };
}

stages!(
    /// Root type chosen, joins allowed.
    FromStage,
    /// Inside the WHERE chain.
    WhereStage,
    /// After GROUP BY.
    GroupStage,
    /// Inside the HAVING chain.
    HavingStage,
    /// After at least one ORDER BY.
    OrderStage,
);

impl ConditionStage for WhereStage {
    const HAVING: bool = false;
}

impl ConditionStage for HavingStage {
    const HAVING: bool = true;
}

impl Mutable for FromStage {}
impl Mutable for WhereStage {}

/// A query over the mapped type `T`.
#[must_use = "a query does nothing until a terminal is called"]
pub struct Query<'s, T: Entity, S: Stage = FromStage> {
    executor: &'s dyn QueryExecutor,
    parts: QueryParts,
    error: Option<Error>,
    _marker: PhantomData<(fn() -> T, S)>,
}

impl<T: Entity, S: Stage> std::fmt::Debug for Query<'_, T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("root", &std::any::type_name::<T>())
            .field("parts", &self.parts)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<'s, T: Entity> Query<'s, T, FromStage> {
    /// Start a query rooted at `T`.
    pub fn new(executor: &'s dyn QueryExecutor) -> Self {
        Self {
            executor,
            parts: QueryParts::default(),
            error: None,
            _marker: PhantomData,
        }
    }

    /// `INNER JOIN` the mapped type `R`.
    pub fn inner_join<R: Entity>(self) -> JoinOn<'s, T> {
        self.join::<R>(JoinType::Inner)
    }

    /// `LEFT JOIN` the mapped type `R`.
    pub fn left_join<R: Entity>(self) -> JoinOn<'s, T> {
        self.join::<R>(JoinType::Left)
    }

    fn join<R: Entity>(self, join_type: JoinType) -> JoinOn<'s, T> {
        JoinOn {
            query: self,
            join_type,
            target: Arc::new(TypeHandle::<R>::new()),
        }
    }

    /// Start the WHERE chain.
    pub fn filter(self, operand: impl Into<Operand>) -> Predicate<'s, T, WhereStage> {
        self.predicate(Connector::And, operand.into())
    }

    pub fn group_by<I, O>(self, items: I) -> Query<'s, T, GroupStage>
    where
        I: IntoIterator<Item = O>,
        O: Into<Operand>,
    {
        self.group(items)
    }

    pub fn order_by(self, operand: impl Into<Operand>) -> Query<'s, T, OrderStage> {
        self.order(operand.into(), Direction::Asc)
    }

    pub fn order_by_desc(self, operand: impl Into<Operand>) -> Query<'s, T, OrderStage> {
        self.order(operand.into(), Direction::Desc)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.parts.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.parts.offset = Some(offset);
        self
    }
}

impl<'s, T: Entity> Query<'s, T, WhereStage> {
    /// Continue the WHERE chain with `AND`.
    pub fn and(self, operand: impl Into<Operand>) -> Predicate<'s, T, WhereStage> {
        self.predicate(Connector::And, operand.into())
    }

    /// Continue the WHERE chain with `OR`.
    pub fn or(self, operand: impl Into<Operand>) -> Predicate<'s, T, WhereStage> {
        self.predicate(Connector::Or, operand.into())
    }

    pub fn group_by<I, O>(self, items: I) -> Query<'s, T, GroupStage>
    where
        I: IntoIterator<Item = O>,
        O: Into<Operand>,
    {
        self.group(items)
    }

    pub fn order_by(self, operand: impl Into<Operand>) -> Query<'s, T, OrderStage> {
        self.order(operand.into(), Direction::Asc)
    }

    pub fn order_by_desc(self, operand: impl Into<Operand>) -> Query<'s, T, OrderStage> {
        self.order(operand.into(), Direction::Desc)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.parts.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.parts.offset = Some(offset);
        self
    }
}

impl<'s, T: Entity> Query<'s, T, GroupStage> {
    /// Start the HAVING chain.
    pub fn having(self, operand: impl Into<Operand>) -> Predicate<'s, T, HavingStage> {
        self.predicate(Connector::And, operand.into())
    }

    pub fn order_by(self, operand: impl Into<Operand>) -> Query<'s, T, OrderStage> {
        self.order(operand.into(), Direction::Asc)
    }

    pub fn order_by_desc(self, operand: impl Into<Operand>) -> Query<'s, T, OrderStage> {
        self.order(operand.into(), Direction::Desc)
    }
}

impl<'s, T: Entity> Query<'s, T, HavingStage> {
    pub fn and(self, operand: impl Into<Operand>) -> Predicate<'s, T, HavingStage> {
        self.predicate(Connector::And, operand.into())
    }

    pub fn or(self, operand: impl Into<Operand>) -> Predicate<'s, T, HavingStage> {
        self.predicate(Connector::Or, operand.into())
    }

    pub fn order_by(self, operand: impl Into<Operand>) -> Query<'s, T, OrderStage> {
        self.order(operand.into(), Direction::Asc)
    }

    pub fn order_by_desc(self, operand: impl Into<Operand>) -> Query<'s, T, OrderStage> {
        self.order(operand.into(), Direction::Desc)
    }
}

impl<T: Entity> Query<'_, T, OrderStage> {
    /// Add another sort key, ascending.
    pub fn order_by(self, operand: impl Into<Operand>) -> Self {
        self.order(operand.into(), Direction::Asc)
    }

    /// Add another sort key, descending.
    pub fn order_by_desc(self, operand: impl Into<Operand>) -> Self {
        self.order(operand.into(), Direction::Desc)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.parts.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.parts.offset = Some(offset);
        self
    }
}

/// Query inputs resolved against the executor.
struct Prepared<'s> {
    executor: &'s dyn QueryExecutor,
    dialect: Arc<dyn Dialect>,
    root: Arc<EntityMapping>,
    joined: Vec<Arc<EntityMapping>>,
    parts: QueryParts,
}

impl Prepared<'_> {
    fn compiler(&self) -> Compiler<'_> {
        Compiler::new(
            self.dialect.as_ref(),
            Arc::clone(&self.root),
            self.joined.clone(),
            &self.parts,
        )
    }
}

impl<'s, T: Entity, S: Stage> Query<'s, T, S> {
    fn advance<N: Stage>(self) -> Query<'s, T, N> {
        Query {
            executor: self.executor,
            parts: self.parts,
            error: self.error,
            _marker: PhantomData,
        }
    }

    fn predicate<N: ConditionStage>(self, connector: Connector, left: Operand) -> Predicate<'s, T, N> {
        Predicate {
            query: self.advance(),
            connector,
            left,
        }
    }

    fn group<I, O>(self, items: I) -> Query<'s, T, GroupStage>
    where
        I: IntoIterator<Item = O>,
        O: Into<Operand>,
    {
        let mut query = self.advance::<GroupStage>();
        query.parts.group_by.extend(items.into_iter().map(Into::into));
        query
    }

    fn order(self, operand: Operand, direction: Direction) -> Query<'s, T, OrderStage> {
        let mut query = self.advance::<OrderStage>();
        query.parts.order_by.push((operand, direction));
        query
    }

    fn defer(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn prepare(self) -> Result<Prepared<'s>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let executor = self.executor;
        let root = executor.mapping_of(&TypeHandle::<T>::new())?;
        let joined = self
            .parts
            .joins
            .iter()
            .map(|join| executor.mapping_of(join.target.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Prepared {
            executor,
            dialect: executor.dialect(),
            root,
            joined,
            parts: self.parts,
        })
    }

    /// Compile the entity `SELECT` without running it.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn compile_select(self) -> Result<CompiledQuery> {
        let prepared = self.prepare()?;
        prepared
            .compiler()
            .select(Projection::Entity { distinct: false }, None)
    }

    /// Compile the `COUNT(*)` query without running it.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn compile_count(self) -> Result<CompiledQuery> {
        let prepared = self.prepare()?;
        prepared.compiler().select(Projection::Count, None)
    }

    /// Compile a projection query without running it.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn compile_rows(self, projection: &[Operand]) -> Result<CompiledQuery> {
        let prepared = self.prepare()?;
        prepared.compiler().select(Projection::Rows(projection), None)
    }

    fn fetch(self, distinct: bool, limit: Option<u64>) -> Result<Vec<T>> {
        let prepared = self.prepare()?;
        let compiled = prepared
            .compiler()
            .select(Projection::Entity { distinct }, limit)?;
        let objects =
            prepared
                .executor
                .fetch_entities(&prepared.root, &compiled.sql, &compiled.params)?;
        objects.into_iter().map(downcast::<T>).collect()
    }

    /// Run the query and hydrate every matching row.
    pub fn select(self) -> Result<Vec<T>> {
        self.fetch(false, None)
    }

    /// Run the query with `LIMIT 1`.
    pub fn select_first(self) -> Result<Option<T>> {
        Ok(self.fetch(false, Some(1))?.into_iter().next())
    }

    /// Run the query as `SELECT DISTINCT`.
    pub fn select_distinct(self) -> Result<Vec<T>> {
        self.fetch(true, None)
    }

    /// Run a projection (columns, aggregates) and return raw rows.
    pub fn select_rows<I, O>(self, projection: I) -> Result<Vec<relmap_core::Row>>
    where
        I: IntoIterator<Item = O>,
        O: Into<Operand>,
    {
        let projection: Vec<Operand> = projection.into_iter().map(Into::into).collect();
        let prepared = self.prepare()?;
        let compiled = prepared
            .compiler()
            .select(Projection::Rows(&projection), None)?;
        prepared
            .executor
            .fetch_rows(&compiled.sql, &compiled.params)
    }

    /// Number of matching rows.
    pub fn count(self) -> Result<u64> {
        let prepared = self.prepare()?;
        let compiled = prepared.compiler().select(Projection::Count, None)?;
        let rows = prepared
            .executor
            .fetch_rows(&compiled.sql, &compiled.params)?;
        let count = rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::illegal_state("COUNT(*) returned no value"))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

impl<'s, T: Entity, S: Mutable> Query<'s, T, S> {
    /// Compile the `UPDATE` without running it.
    #[tracing::instrument(level = "trace", skip(self, assignments))]
    pub fn compile_update<I, V>(self, assignments: I) -> Result<CompiledQuery>
    where
        I: IntoIterator<Item = (Col<T>, V)>,
        V: Into<Operand>,
    {
        let assignments: Vec<(ColumnRef, Operand)> = assignments
            .into_iter()
            .map(|(column, value)| (column.erase(), value.into()))
            .collect();
        let prepared = self.prepare()?;
        prepared.compiler().update(&assignments)
    }

    /// Compile the `DELETE` without running it.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn compile_delete(self) -> Result<CompiledQuery> {
        let prepared = self.prepare()?;
        prepared.compiler().delete()
    }

    /// Set columns on every matching row; returns the affected row count.
    ///
    /// Objects already loaded are not refreshed.
    pub fn update<I, V>(self, assignments: I) -> Result<u64>
    where
        I: IntoIterator<Item = (Col<T>, V)>,
        V: Into<Operand>,
    {
        let executor = self.executor;
        let compiled = self.compile_update(assignments)?;
        executor.execute_statement(&compiled.sql, &compiled.params)
    }

    /// Delete every matching row; returns the affected row count.
    ///
    /// This is a bulk statement: relation cascades are not applied.
    pub fn delete(self) -> Result<u64> {
        let executor = self.executor;
        let compiled = self.compile_delete()?;
        executor.execute_statement(&compiled.sql, &compiled.params)
    }
}

fn downcast<T: Entity>(object: Box<dyn Any + Send>) -> Result<T> {
    object.downcast::<T>().map(|b| *b).map_err(|_| {
        Error::illegal_state(format!(
            "hydrated object is not a {}",
            std::any::type_name::<T>()
        ))
    })
}

/// A join waiting for its left column.
#[must_use = "a join must be completed with on(..).is(..)"]
pub struct JoinOn<'s, T: Entity> {
    query: Query<'s, T, FromStage>,
    join_type: JoinType,
    target: Arc<dyn EntityType>,
}

impl<'s, T: Entity> JoinOn<'s, T> {
    pub fn on<A: Entity>(self, column: Col<A>) -> JoinIs<'s, T> {
        JoinIs {
            query: self.query,
            join_type: self.join_type,
            target: self.target,
            left: column.erase(),
        }
    }
}

/// A join waiting for its right column.
#[must_use = "a join must be completed with on(..).is(..)"]
pub struct JoinIs<'s, T: Entity> {
    query: Query<'s, T, FromStage>,
    join_type: JoinType,
    target: Arc<dyn EntityType>,
    left: ColumnRef,
}

impl<'s, T: Entity> JoinIs<'s, T> {
    pub fn is<B: Entity>(self, column: Col<B>) -> Query<'s, T, FromStage> {
        let mut query = self.query;
        query.parts.joins.push(JoinClause {
            join_type: self.join_type,
            target: self.target,
            left: self.left,
            right: column.erase(),
        });
        query
    }
}

/// The left side of a condition, waiting for its comparator.
#[must_use = "a predicate needs a comparator"]
pub struct Predicate<'s, T: Entity, S: ConditionStage> {
    query: Query<'s, T, S>,
    connector: Connector,
    left: Operand,
}

impl<'s, T: Entity, S: ConditionStage> Predicate<'s, T, S> {
    fn push(self, condition: Condition) -> Query<'s, T, S> {
        let mut query = self.query;
        let tokens = if S::HAVING {
            &mut query.parts.having
        } else {
            &mut query.parts.filter
        };
        push_condition(tokens, self.connector, condition);
        query
    }

    fn compare(self, op: Comparator, right: Operand) -> Query<'s, T, S> {
        let left = self.left.clone();
        self.push(Condition::Compare { left, op, right })
    }

    pub fn eq(self, value: impl Into<Operand>) -> Query<'s, T, S> {
        self.compare(Comparator::Eq, value.into())
    }

    pub fn ne(self, value: impl Into<Operand>) -> Query<'s, T, S> {
        self.compare(Comparator::Ne, value.into())
    }

    pub fn gt(self, value: impl Into<Operand>) -> Query<'s, T, S> {
        self.compare(Comparator::Gt, value.into())
    }

    pub fn ge(self, value: impl Into<Operand>) -> Query<'s, T, S> {
        self.compare(Comparator::Ge, value.into())
    }

    pub fn lt(self, value: impl Into<Operand>) -> Query<'s, T, S> {
        self.compare(Comparator::Lt, value.into())
    }

    pub fn le(self, value: impl Into<Operand>) -> Query<'s, T, S> {
        self.compare(Comparator::Le, value.into())
    }

    /// Compare with the primary key of `entity`.
    pub fn eq_entity<R: Entity>(self, entity: &R) -> Query<'s, T, S> {
        let key = self
            .query
            .executor
            .mapping_of(&TypeHandle::<R>::new())
            .and_then(|mapping| mapping.single_key()?.read(entity as &dyn Any));
        match key {
            Ok(key) => self.compare(Comparator::Eq, Operand::Value(key)),
            Err(err) => {
                let mut query = self.query;
                query.defer(err);
                query
            }
        }
    }

    /// `LIKE`, with wildcards placed according to `mode`.
    pub fn like(self, pattern: &str, mode: LikeMode) -> Query<'s, T, S> {
        let left = self.left.clone();
        self.push(Condition::Like {
            left,
            pattern: mode.apply(pattern),
        })
    }

    pub fn in_list<I, V>(self, values: I) -> Query<'s, T, S>
    where
        I: IntoIterator<Item = V>,
        V: Into<Operand>,
    {
        self.membership(values, false)
    }

    pub fn not_in<I, V>(self, values: I) -> Query<'s, T, S>
    where
        I: IntoIterator<Item = V>,
        V: Into<Operand>,
    {
        self.membership(values, true)
    }

    fn membership<I, V>(self, values: I, negated: bool) -> Query<'s, T, S>
    where
        I: IntoIterator<Item = V>,
        V: Into<Operand>,
    {
        let left = self.left.clone();
        self.push(Condition::In {
            left,
            values: values.into_iter().map(Into::into).collect(),
            negated,
        })
    }

    pub fn is_null(self) -> Query<'s, T, S> {
        let left = self.left.clone();
        self.push(Condition::IsNull {
            left,
            negated: false,
        })
    }

    pub fn is_not_null(self) -> Query<'s, T, S> {
        let left = self.left.clone();
        self.push(Condition::IsNull {
            left,
            negated: true,
        })
    }

    /// `BETWEEN low AND high`, inclusive.
    pub fn between(self, low: impl Into<Operand>, high: impl Into<Operand>) -> Query<'s, T, S> {
        let left = self.left.clone();
        self.push(Condition::Between {
            left,
            low: low.into(),
            high: high.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::{Function, col};
    use relmap_core::{
        EntityDef, MappingRegistry, MysqlDialect, Ref, RelationList, Row, SqlEnum, SqliteDialect,
    };
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Team {
        id: i64,
        name: String,
        heroes: RelationList<Hero>,
    }

    impl Entity for Team {
        fn define(def: &mut EntityDef<Self>) {
            def.table("teams");
            def.column("id", |t| &t.id, |t| &mut t.id).primary_key();
            def.column("name", |t| &t.name, |t| &mut t.name);
            def.one_to_many("heroes", "team_id", |t| &t.heroes, |t| &mut t.heroes);
        }
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    enum Mood {
        #[default]
        Calm,
        Angry,
    }

    impl SqlEnum for Mood {
        fn name(&self) -> &'static str {
            match self {
                Mood::Calm => "Calm",
                Mood::Angry => "Angry",
            }
        }

        fn ordinal(&self) -> i64 {
            match self {
                Mood::Calm => 0,
                Mood::Angry => 1,
            }
        }

        fn from_name(name: &str) -> Option<Self> {
            match name {
                "Calm" => Some(Mood::Calm),
                "Angry" => Some(Mood::Angry),
                _ => None,
            }
        }

        fn from_ordinal(ordinal: i64) -> Option<Self> {
            match ordinal {
                0 => Some(Mood::Calm),
                1 => Some(Mood::Angry),
                _ => None,
            }
        }
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Hero {
        id: i64,
        name: String,
        age: i32,
        mood: Mood,
        team: Ref<Team>,
    }

    impl Entity for Hero {
        fn define(def: &mut EntityDef<Self>) {
            def.column("id", |h| &h.id, |h| &mut h.id).primary_key();
            def.column("name", |h| &h.name, |h| &mut h.name);
            def.column("age", |h| &h.age, |h| &mut h.age);
            def.enum_column("mood", |h| &h.mood, |h| &mut h.mood).ordinal();
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

    const HERO_COLUMNS: &str = r#"T0."id", T0."name", T0."age", T0."mood", T0."team_id""#;

    #[derive(Default)]
    struct MockExecutor {
        registry: MappingRegistry,
        statements: Mutex<Vec<(String, Vec<Value>)>>,
        mysql: bool,
    }

    impl MockExecutor {
        fn record(&self, sql: &str, params: &[Value]) {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
        }

        fn last_sql(&self) -> String {
            self.statements.lock().unwrap().last().unwrap().0.clone()
        }
    }

    impl QueryExecutor for MockExecutor {
        fn dialect(&self) -> Arc<dyn Dialect> {
            if self.mysql {
                Arc::new(MysqlDialect)
            } else {
                Arc::new(SqliteDialect)
            }
        }

        fn mapping_of(&self, entity: &dyn EntityType) -> Result<Arc<EntityMapping>> {
            self.registry.mapping_of(entity)
        }

        fn fetch_entities(
            &self,
            mapping: &Arc<EntityMapping>,
            sql: &str,
            params: &[Value],
        ) -> Result<Vec<Box<dyn Any + Send>>> {
            self.record(sql, params);
            Ok(vec![mapping.new_instance()])
        }

        fn fetch_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
            self.record(sql, params);
            Ok(vec![Row::new(vec!["count".into()], vec![Value::BigInt(3)])])
        }

        fn execute_statement(&self, sql: &str, params: &[Value]) -> Result<u64> {
            self.record(sql, params);
            Ok(2)
        }
    }

    fn heroes(exec: &MockExecutor) -> Query<'_, Hero> {
        Query::new(exec)
    }

    #[test]
    fn filter_order_and_limit() {
        let exec = MockExecutor::default();
        let compiled = heroes(&exec)
            .filter(col::<Hero>("age"))
            .gt(30)
            .order_by(col::<Hero>("name"))
            .limit(10)
            .compile_select()
            .unwrap();
        assert_eq!(
            compiled.sql,
            format!(
                r#"SELECT {HERO_COLUMNS} FROM "hero" AS T0 WHERE T0."age" > ?1 ORDER BY T0."name" ASC LIMIT 10"#
            )
        );
        assert_eq!(compiled.params, vec![Value::Int(30)]);
    }

    #[test]
    fn identical_builds_compile_identically() {
        let exec = MockExecutor::default();
        let build = || {
            heroes(&exec)
                .filter(col::<Hero>("name"))
                .eq("Thor")
                .or(col::<Hero>("age"))
                .le(40)
                .order_by_desc(col::<Hero>("age"))
                .order_by(col::<Hero>("id"))
                .compile_select()
                .unwrap()
        };
        let first = build();
        assert_eq!(first, build());
        assert!(first.sql.ends_with(
            r#"WHERE T0."name" = ?1 OR T0."age" <= ?2 ORDER BY T0."age" DESC, T0."id" ASC"#
        ));
    }

    #[test]
    fn discriminator_scopes_root() {
        let exec = MockExecutor::default();
        let all = Query::<Dog>::new(&exec).compile_select().unwrap();
        assert_eq!(
            all.sql,
            r#"SELECT T0."id", T0."name" FROM "animal" AS T0 WHERE T0."kind" = ?1"#
        );
        assert_eq!(all.params, vec![Value::Text("dog".into())]);

        let named = Query::<Dog>::new(&exec)
            .filter(col::<Dog>("name"))
            .eq("Rex")
            .or(col::<Dog>("name"))
            .eq("Fido")
            .compile_select()
            .unwrap();
        assert!(named.sql.ends_with(
            r#"WHERE (T0."name" = ?1 OR T0."name" = ?2) AND T0."kind" = ?3"#
        ));
        assert_eq!(named.params[2], Value::Text("dog".into()));
    }

    #[test]
    fn discriminator_scopes_joins() {
        let exec = MockExecutor::default();
        let compiled = heroes(&exec)
            .left_join::<Dog>()
            .on(col::<Hero>("name"))
            .is(col::<Dog>("name"))
            .compile_count()
            .unwrap();
        assert_eq!(
            compiled.sql,
            r#"SELECT COUNT(*) FROM "hero" AS T0 LEFT JOIN "animal" AS T1 ON T0."name" = T1."name" AND T1."kind" = ?1"#
        );
    }

    #[test]
    fn joins_resolve_columns_by_alias() {
        let exec = MockExecutor::default();
        let compiled = heroes(&exec)
            .inner_join::<Team>()
            .on(col::<Hero>("team"))
            .is(col::<Team>("id"))
            .filter(col::<Team>("name"))
            .eq("Avengers")
            .compile_select()
            .unwrap();
        assert_eq!(
            compiled.sql,
            format!(
                r#"SELECT {HERO_COLUMNS} FROM "hero" AS T0 INNER JOIN "teams" AS T1 ON T0."team_id" = T1."id" WHERE T1."name" = ?1"#
            )
        );
    }

    #[test]
    fn empty_in_lists_are_constant() {
        let exec = MockExecutor::default();
        let none = heroes(&exec)
            .filter(col::<Hero>("age"))
            .in_list(Vec::<i32>::new())
            .compile_select()
            .unwrap();
        assert!(none.sql.ends_with("WHERE 1 = 0"));
        assert!(none.params.is_empty());

        let all = heroes(&exec)
            .filter(col::<Hero>("age"))
            .not_in(Vec::<i32>::new())
            .compile_select()
            .unwrap();
        assert!(all.sql.ends_with("WHERE 1 = 1"));

        let some = heroes(&exec)
            .filter(col::<Hero>("age"))
            .in_list([1, 2])
            .compile_select()
            .unwrap();
        assert!(some.sql.ends_with(r#"WHERE T0."age" IN (?1, ?2)"#));
    }

    #[test]
    fn like_between_and_null_checks() {
        let exec = MockExecutor::default();
        let compiled = heroes(&exec)
            .filter(col::<Hero>("name"))
            .like("Spi", LikeMode::Start)
            .and(col::<Hero>("age"))
            .between(18, 30)
            .and(col::<Hero>("team"))
            .is_null()
            .compile_select()
            .unwrap();
        assert!(compiled.sql.ends_with(
            r#"WHERE T0."name" LIKE ?1 AND T0."age" BETWEEN ?2 AND ?3 AND T0."team_id" IS NULL"#
        ));
        assert_eq!(
            compiled.params,
            vec![Value::Text("Spi%".into()), Value::Int(18), Value::Int(30)]
        );
    }

    #[test]
    fn enum_operands_follow_column_storage() {
        let exec = MockExecutor::default();
        let compiled = heroes(&exec)
            .filter(col::<Hero>("mood"))
            .eq(Operand::variant(Mood::Angry))
            .compile_select()
            .unwrap();
        assert_eq!(compiled.params, vec![Value::BigInt(1)]);
    }

    #[test]
    fn entity_operand_binds_its_key() {
        let exec = MockExecutor::default();
        let team = Team {
            id: 5,
            ..Team::default()
        };
        let compiled = heroes(&exec)
            .filter(col::<Hero>("team"))
            .eq_entity(&team)
            .compile_select()
            .unwrap();
        assert_eq!(compiled.params, vec![Value::BigInt(5)]);
    }

    #[test]
    fn grouped_projection() {
        let exec = MockExecutor::default();
        let compiled = heroes(&exec)
            .group_by([col::<Hero>("team")])
            .having(Function::count_star())
            .gt(2)
            .compile_rows(&[col::<Hero>("team").into(), Function::max(&col::<Hero>("age")).into()])
            .unwrap();
        assert_eq!(
            compiled.sql,
            r#"SELECT T0."team_id", MAX(T0."age") FROM "hero" AS T0 GROUP BY T0."team_id" HAVING COUNT(*) > ?1"#
        );
    }

    #[test]
    fn update_and_delete() {
        let exec = MockExecutor::default();
        let update = heroes(&exec)
            .filter(col::<Hero>("age"))
            .lt(18)
            .compile_update([(col::<Hero>("name"), "kid")])
            .unwrap();
        assert_eq!(
            update.sql,
            r#"UPDATE "hero" AS T0 SET "name" = ?1 WHERE T0."age" < ?2"#
        );
        assert_eq!(
            update.params,
            vec![Value::Text("kid".into()), Value::Int(18)]
        );

        let delete = heroes(&exec).compile_delete().unwrap();
        assert_eq!(delete.sql, r#"DELETE FROM "hero" AS T0"#);
    }

    #[test]
    fn joined_update_uses_key_subquery() {
        let exec = MockExecutor::default();
        let compiled = heroes(&exec)
            .inner_join::<Team>()
            .on(col::<Hero>("team"))
            .is(col::<Team>("id"))
            .filter(col::<Team>("name"))
            .eq("X")
            .compile_update([(col::<Hero>("age"), 1)])
            .unwrap();
        assert_eq!(
            compiled.sql,
            r#"UPDATE "hero" AS T0 SET "age" = ?1 WHERE T0."id" IN (SELECT T0."id" FROM "hero" AS T0 INNER JOIN "teams" AS T1 ON T0."team_id" = T1."id" WHERE T1."name" = ?2)"#
        );

        let delete = Query::<Dog>::new(&exec)
            .inner_join::<Hero>()
            .on(col::<Dog>("name"))
            .is(col::<Hero>("name"))
            .compile_delete()
            .unwrap();
        assert_eq!(
            delete.sql,
            r#"DELETE FROM "animal" AS T0 WHERE T0."id" IN (SELECT T0."id" FROM "animal" AS T0 INNER JOIN "hero" AS T1 ON T0."name" = T1."name" WHERE T0."kind" = ?1)"#
        );
    }

    #[test]
    fn joined_mutations_on_mysql_use_a_derived_table() {
        let exec = MockExecutor {
            mysql: true,
            ..Default::default()
        };
        let delete = heroes(&exec)
            .inner_join::<Team>()
            .on(col::<Hero>("team"))
            .is(col::<Team>("id"))
            .filter(col::<Team>("name"))
            .eq("X")
            .compile_delete()
            .unwrap();
        assert_eq!(
            delete.sql,
            "DELETE T0 FROM `hero` AS T0 WHERE T0.`id` IN (SELECT K.`id` FROM (SELECT T0.`id` FROM `hero` AS T0 INNER JOIN `teams` AS T1 ON T0.`team_id` = T1.`id` WHERE T1.`name` = ?) AS K)"
        );
        assert_eq!(delete.params, vec![Value::Text("X".into())]);

        let update = heroes(&exec)
            .inner_join::<Team>()
            .on(col::<Hero>("team"))
            .is(col::<Team>("id"))
            .compile_update([(col::<Hero>("age"), 1)])
            .unwrap();
        assert!(update.sql.starts_with("UPDATE `hero` AS T0 SET `age` = ? WHERE T0.`id` IN (SELECT K.`id` FROM ("));
        assert!(update.sql.ends_with(") AS K)"));
    }

    #[test]
    fn invalid_references_are_illegal_state() {
        let exec = MockExecutor::default();
        let unjoined = heroes(&exec)
            .filter(col::<Team>("name"))
            .eq("X")
            .compile_select()
            .unwrap_err();
        assert!(matches!(unjoined, Error::IllegalState(_)));

        let collection = Query::<Team>::new(&exec)
            .filter(col::<Team>("heroes"))
            .is_null()
            .compile_select()
            .unwrap_err();
        assert!(matches!(collection, Error::IllegalState(_)));

        let empty = heroes(&exec)
            .compile_update(Vec::<(Col<Hero>, i32)>::new())
            .unwrap_err();
        assert!(matches!(empty, Error::IllegalState(_)));
    }

    #[test]
    fn terminals_run_through_the_executor() {
        let exec = MockExecutor::default();
        let first = heroes(&exec).select_first().unwrap();
        assert_eq!(first, Some(Hero::default()));
        assert!(exec.last_sql().ends_with("LIMIT 1"));

        assert_eq!(heroes(&exec).count().unwrap(), 3);
        assert!(exec.last_sql().starts_with("SELECT COUNT(*)"));

        let distinct = heroes(&exec).offset(5).select_distinct().unwrap();
        assert_eq!(distinct.len(), 1);
        assert!(exec.last_sql().starts_with("SELECT DISTINCT"));
        assert!(exec.last_sql().ends_with("LIMIT -1 OFFSET 5"));

        let deleted = heroes(&exec)
            .filter(col::<Hero>("id"))
            .eq(1_i64)
            .delete()
            .unwrap();
        assert_eq!(deleted, 2);
    }
}
