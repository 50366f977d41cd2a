//! Scored-set primitives over redb tables
//!
//! The index keeps its secondary orderings as sorted sets: members with a
//! numeric score, iterable by rank. Two tables back every set: one maps
//! `(set, member)` to the score for O(log n) lookup and update, the other
//! keys `(set, score, member)` so a range scan walks members in score order.
//! Set names must not contain NUL (the range upper bound appends one).

use redb::{ReadableTable, Table, TableDefinition};

use crate::Result;

/// `(set, member) → score`
pub(crate) const ZSET_SCORES: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("zset_scores");

/// `(set, score, member) → ()`, the iteration order
pub(crate) const ZSET_RANKS: TableDefinition<(&str, u64, &str), ()> =
    TableDefinition::new("zset_ranks");

pub(crate) type ScoreTable<'txn> = Table<'txn, (&'static str, &'static str), u64>;
pub(crate) type RankTable<'txn> = Table<'txn, (&'static str, u64, &'static str), ()>;

fn set_end(set: &str) -> String {
    format!("{}\u{0}", set)
}

/// Insert a member only if absent. Returns whether it was added.
pub(crate) fn zadd_nx(
    scores: &mut ScoreTable<'_>,
    ranks: &mut RankTable<'_>,
    set: &str,
    member: &str,
    score: u64,
) -> Result<bool> {
    let existing = scores.get((set, member))?.map(|g| g.value());
    if existing.is_some() {
        return Ok(false);
    }
    scores.insert((set, member), score)?;
    ranks.insert((set, score, member), ())?;
    Ok(true)
}

/// Update a member's score only if present. Returns whether it was updated.
pub(crate) fn zadd_xx(
    scores: &mut ScoreTable<'_>,
    ranks: &mut RankTable<'_>,
    set: &str,
    member: &str,
    score: u64,
) -> Result<bool> {
    let Some(old) = scores.get((set, member))?.map(|g| g.value()) else {
        return Ok(false);
    };
    if old != score {
        ranks.remove((set, old, member))?;
        ranks.insert((set, score, member), ())?;
        scores.insert((set, member), score)?;
    }
    Ok(true)
}

/// Insert or update a member's score
pub(crate) fn zadd(
    scores: &mut ScoreTable<'_>,
    ranks: &mut RankTable<'_>,
    set: &str,
    member: &str,
    score: u64,
) -> Result<()> {
    if !zadd_xx(scores, ranks, set, member, score)? {
        zadd_nx(scores, ranks, set, member, score)?;
    }
    Ok(())
}

/// Remove a member. Returns whether it was present.
pub(crate) fn zrem(
    scores: &mut ScoreTable<'_>,
    ranks: &mut RankTable<'_>,
    set: &str,
    member: &str,
) -> Result<bool> {
    let Some(score) = scores.remove((set, member))?.map(|g| g.value()) else {
        return Ok(false);
    };
    ranks.remove((set, score, member))?;
    Ok(true)
}

/// Remove an entire set
pub(crate) fn zdrop(
    scores: &mut ScoreTable<'_>,
    ranks: &mut RankTable<'_>,
    set: &str,
) -> Result<()> {
    for member in zmembers(ranks, set)? {
        zrem(scores, ranks, set, &member)?;
    }
    Ok(())
}

/// Score of a member
pub(crate) fn zscore<T>(scores: &T, set: &str, member: &str) -> Result<Option<u64>>
where
    T: ReadableTable<(&'static str, &'static str), u64>,
{
    Ok(scores.get((set, member))?.map(|g| g.value()))
}

/// Cardinality of a set
pub(crate) fn zcard<T>(scores: &T, set: &str) -> Result<u64>
where
    T: ReadableTable<(&'static str, &'static str), u64>,
{
    let end = set_end(set);
    let mut count = 0u64;
    for entry in scores.range((set, "")..(end.as_str(), ""))? {
        entry?;
        count += 1;
    }
    Ok(count)
}

/// All `(member, score)` pairs in ascending score order
pub(crate) fn zrange_all<T>(ranks: &T, set: &str) -> Result<Vec<(String, u64)>>
where
    T: ReadableTable<(&'static str, u64, &'static str), ()>,
{
    let end = set_end(set);
    let mut out = Vec::new();
    for entry in ranks.range((set, 0u64, "")..(end.as_str(), 0u64, ""))? {
        let (key, _) = entry?;
        let (_, score, member) = key.value();
        out.push((member.to_string(), score));
    }
    Ok(out)
}

/// Members in ascending score order
pub(crate) fn zmembers<T>(ranks: &T, set: &str) -> Result<Vec<String>>
where
    T: ReadableTable<(&'static str, u64, &'static str), ()>,
{
    Ok(zrange_all(ranks, set)?.into_iter().map(|(m, _)| m).collect())
}

/// The member at a given ascending rank
pub(crate) fn znth<T>(ranks: &T, set: &str, rank: u64) -> Result<Option<String>>
where
    T: ReadableTable<(&'static str, u64, &'static str), ()>,
{
    let end = set_end(set);
    match ranks
        .range((set, 0u64, "")..(end.as_str(), 0u64, ""))?
        .nth(rank as usize)
    {
        Some(entry) => {
            let (key, _) = entry?;
            Ok(Some(key.value().2.to_string()))
        }
        None => Ok(None),
    }
}

/// Top `n` members, highest score first
pub(crate) fn zrevrange<T>(ranks: &T, set: &str, n: usize) -> Result<Vec<String>>
where
    T: ReadableTable<(&'static str, u64, &'static str), ()>,
{
    let end = set_end(set);
    let mut out = Vec::new();
    for entry in ranks
        .range((set, 0u64, "")..(end.as_str(), 0u64, ""))?
        .rev()
        .take(n)
    {
        let (key, _) = entry?;
        out.push(key.value().2.to_string());
    }
    Ok(out)
}

/// Last `n` members in ascending order (the tail of the set)
pub(crate) fn ztail<T>(ranks: &T, set: &str, n: usize) -> Result<Vec<String>>
where
    T: ReadableTable<(&'static str, u64, &'static str), ()>,
{
    let mut out = zrevrange(ranks, set, n)?;
    out.reverse();
    Ok(out)
}

/// Ascending rank of a member
pub(crate) fn zrank<S, R>(scores: &S, ranks: &R, set: &str, member: &str) -> Result<Option<u64>>
where
    S: ReadableTable<(&'static str, &'static str), u64>,
    R: ReadableTable<(&'static str, u64, &'static str), ()>,
{
    let Some(score) = zscore(scores, set, member)? else {
        return Ok(None);
    };
    let mut rank = 0u64;
    for entry in ranks.range((set, 0u64, "")..(set, score, member))? {
        entry?;
        rank += 1;
    }
    Ok(Some(rank))
}

/// Descending rank of a member (0 = highest score)
pub(crate) fn zrevrank<S, R>(scores: &S, ranks: &R, set: &str, member: &str) -> Result<Option<u64>>
where
    S: ReadableTable<(&'static str, &'static str), u64>,
    R: ReadableTable<(&'static str, u64, &'static str), ()>,
{
    let Some(rank) = zrank(scores, ranks, set, member)? else {
        return Ok(None);
    };
    let card = zcard(scores, set)?;
    Ok(Some(card - 1 - rank))
}

/// Count members with score in `[min, max]`
pub(crate) fn zcount<T>(ranks: &T, set: &str, min: u64, max: u64) -> Result<u64>
where
    T: ReadableTable<(&'static str, u64, &'static str), ()>,
{
    let end = set_end(set);
    let mut count = 0u64;
    for entry in ranks.range((set, min, "")..(end.as_str(), 0u64, ""))? {
        let (key, _) = entry?;
        if key.value().1 > max {
            break;
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::Database;
    use tempfile::TempDir;

    fn with_tables<F: FnOnce(&mut ScoreTable<'_>, &mut RankTable<'_>)>(f: F) {
        let tmp = TempDir::new().unwrap();
        let db = Database::create(tmp.path().join("z.redb")).unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut scores = txn.open_table(ZSET_SCORES).unwrap();
            let mut ranks = txn.open_table(ZSET_RANKS).unwrap();
            f(&mut scores, &mut ranks);
        }
        txn.commit().unwrap();
    }

    #[test]
    fn test_zadd_nx_and_score() {
        with_tables(|scores, ranks| {
            assert!(zadd_nx(scores, ranks, "s", "a", 10).unwrap());
            assert!(!zadd_nx(scores, ranks, "s", "a", 99).unwrap());
            assert_eq!(zscore(scores, "s", "a").unwrap(), Some(10));
            assert_eq!(zscore(scores, "s", "missing").unwrap(), None);
        });
    }

    #[test]
    fn test_zadd_xx_moves_rank_entry() {
        with_tables(|scores, ranks| {
            assert!(!zadd_xx(scores, ranks, "s", "a", 5).unwrap());
            zadd_nx(scores, ranks, "s", "a", 5).unwrap();
            zadd_nx(scores, ranks, "s", "b", 10).unwrap();
            assert!(zadd_xx(scores, ranks, "s", "a", 20).unwrap());
            assert_eq!(
                zmembers(ranks, "s").unwrap(),
                vec!["b".to_string(), "a".to_string()]
            );
            // exactly one rank entry per member survives the move
            assert_eq!(zrange_all(ranks, "s").unwrap().len(), 2);
        });
    }

    #[test]
    fn test_zrem_and_zcard() {
        with_tables(|scores, ranks| {
            zadd_nx(scores, ranks, "s", "a", 1).unwrap();
            zadd_nx(scores, ranks, "s", "b", 2).unwrap();
            assert_eq!(zcard(scores, "s").unwrap(), 2);
            assert!(zrem(scores, ranks, "s", "a").unwrap());
            assert!(!zrem(scores, ranks, "s", "a").unwrap());
            assert_eq!(zcard(scores, "s").unwrap(), 1);
        });
    }

    #[test]
    fn test_sets_are_isolated() {
        with_tables(|scores, ranks| {
            zadd_nx(scores, ranks, "s1", "a", 1).unwrap();
            zadd_nx(scores, ranks, "s2", "b", 2).unwrap();
            assert_eq!(zmembers(ranks, "s1").unwrap(), vec!["a".to_string()]);
            assert_eq!(zmembers(ranks, "s2").unwrap(), vec!["b".to_string()]);
            assert_eq!(zcard(scores, "s1").unwrap(), 1);
        });
    }

    #[test]
    fn test_rank_queries() {
        with_tables(|scores, ranks| {
            zadd_nx(scores, ranks, "s", "old", 100).unwrap();
            zadd_nx(scores, ranks, "s", "mid", 200).unwrap();
            zadd_nx(scores, ranks, "s", "new", 300).unwrap();
            assert_eq!(zrank(scores, ranks, "s", "old").unwrap(), Some(0));
            assert_eq!(zrank(scores, ranks, "s", "new").unwrap(), Some(2));
            assert_eq!(zrevrank(scores, ranks, "s", "new").unwrap(), Some(0));
            assert_eq!(zrevrank(scores, ranks, "s", "old").unwrap(), Some(2));
            assert_eq!(zrank(scores, ranks, "s", "missing").unwrap(), None);
            assert_eq!(znth(ranks, "s", 1).unwrap(), Some("mid".to_string()));
            assert_eq!(znth(ranks, "s", 9).unwrap(), None);
        });
    }

    #[test]
    fn test_zrevrange_and_tail() {
        with_tables(|scores, ranks| {
            for (m, s) in [("a", 1u64), ("b", 2), ("c", 3), ("d", 4)] {
                zadd_nx(scores, ranks, "s", m, s).unwrap();
            }
            assert_eq!(
                zrevrange(ranks, "s", 2).unwrap(),
                vec!["d".to_string(), "c".to_string()]
            );
            assert_eq!(
                ztail(ranks, "s", 2).unwrap(),
                vec!["c".to_string(), "d".to_string()]
            );
        });
    }

    #[test]
    fn test_zcount() {
        with_tables(|scores, ranks| {
            for (m, s) in [("a", 10u64), ("b", 20), ("c", 30)] {
                zadd_nx(scores, ranks, "s", m, s).unwrap();
            }
            assert_eq!(zcount(ranks, "s", 10, 30).unwrap(), 3);
            assert_eq!(zcount(ranks, "s", 15, 25).unwrap(), 1);
            assert_eq!(zcount(ranks, "s", 31, 99).unwrap(), 0);
        });
    }

    #[test]
    fn test_zdrop() {
        with_tables(|scores, ranks| {
            zadd_nx(scores, ranks, "s", "a", 1).unwrap();
            zadd_nx(scores, ranks, "s", "b", 2).unwrap();
            zadd_nx(scores, ranks, "other", "keep", 3).unwrap();
            zdrop(scores, ranks, "s").unwrap();
            assert_eq!(zcard(scores, "s").unwrap(), 0);
            assert_eq!(zcard(scores, "other").unwrap(), 1);
        });
    }

    #[test]
    fn test_equal_scores_order_by_member() {
        with_tables(|scores, ranks| {
            zadd_nx(scores, ranks, "s", "bbb", 5).unwrap();
            zadd_nx(scores, ranks, "s", "aaa", 5).unwrap();
            assert_eq!(
                zmembers(ranks, "s").unwrap(),
                vec!["aaa".to_string(), "bbb".to_string()]
            );
        });
    }
}
