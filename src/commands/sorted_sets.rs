//! Operations on sorted sets (members ordered by a floating-point score).

use bytes::Bytes;

use crate::completion::{extract, ReplyFuture};
use crate::message::{Arg, Command, Message};

use super::Executor;

pub trait SortedSetCommands: Executor {
    /// Adds a member with the given score; resolves `true` when the member
    /// was newly added rather than re-scored.
    fn sorted_set_add(
        &self,
        db: i32,
        key: &str,
        score: f64,
        member: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(
                db,
                Command::ZAdd,
                vec![Arg::string(key), Arg::float(score), Arg::blob(member)],
            ),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    /// Removes a member; resolves whether it was present.
    fn sorted_set_remove(
        &self,
        db: i32,
        key: &str,
        member: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<bool> {
        self.deliver(
            Message::new(db, Command::ZRem, vec![Arg::string(key), Arg::blob(member)]),
            Box::new(extract::boolean),
            queue_jump,
        )
    }

    /// Increments a member's score; resolves the new score.
    fn sorted_set_increment(
        &self,
        db: i32,
        key: &str,
        member: impl Into<Bytes>,
        delta: f64,
        queue_jump: bool,
    ) -> ReplyFuture<f64> {
        self.deliver(
            Message::new(
                db,
                Command::ZIncrBy,
                vec![Arg::string(key), Arg::float(delta), Arg::blob(member)],
            ),
            Box::new(extract::float64),
            queue_jump,
        )
    }

    /// A member's score, or an error when it is not in the set.
    fn sorted_set_score(
        &self,
        db: i32,
        key: &str,
        member: impl Into<Bytes>,
        queue_jump: bool,
    ) -> ReplyFuture<f64> {
        self.deliver(
            Message::new(db, Command::ZScore, vec![Arg::string(key), Arg::blob(member)]),
            Box::new(extract::float64),
            queue_jump,
        )
    }

    fn sorted_set_cardinality(&self, db: i32, key: &str, queue_jump: bool) -> ReplyFuture<i64> {
        self.deliver(
            Message::new(db, Command::ZCard, vec![Arg::string(key)]),
            Box::new(extract::int64),
            queue_jump,
        )
    }

    /// Members between `start` and `stop` by rank, with their scores,
    /// ascending.
    fn sorted_set_range_with_scores(
        &self,
        db: i32,
        key: &str,
        start: i64,
        stop: i64,
        queue_jump: bool,
    ) -> ReplyFuture<Vec<(Bytes, f64)>> {
        self.deliver(
            Message::new(
                db,
                Command::ZRange,
                vec![
                    Arg::string(key),
                    Arg::int(start),
                    Arg::int(stop),
                    Arg::literal(Command::WithScores),
                ],
            ),
            Box::new(extract::score_pairs),
            queue_jump,
        )
    }
}

impl<C: Executor + ?Sized> SortedSetCommands for C {}
