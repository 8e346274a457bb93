use alloc::sync::Arc;

use super::{Stream, first_of};
use crate::{AsyncM, Either, Progress, Value};

/// Where one side of a combination is up to.
enum Tail<T> {
    Done,
    /// Not started yet.
    Cold(AsyncM<Stream<T>>),
    /// Started on an earlier step and still in flight.
    Hot(AsyncM<Stream<T>>),
}

impl<T: Value> Clone for Tail<T> {
    fn clone(&self) -> Self {
        match self {
            Tail::Done => Tail::Done,
            Tail::Cold(m) => Tail::Cold(m.clone()),
            Tail::Hot(m) => Tail::Hot(m.clone()),
        }
    }
}

impl<T: Value> Tail<T> {
    fn heat(self, p: &Progress) -> Self {
        match self {
            Tail::Cold(m) => Tail::Hot(m.start(p)),
            t => t,
        }
    }
}

struct Side<T> {
    latest: Option<T>,
    tail: Tail<T>,
}

impl<T: Value> Clone for Side<T> {
    fn clone(&self) -> Self {
        Self {
            latest: self.latest.clone(),
            tail: self.tail.clone(),
        }
    }
}

impl<T: Value> Side<T> {
    fn new(s: &Stream<T>) -> Self {
        let mut side = Self {
            latest: None,
            tail: Tail::Done,
        };
        side.advance(s.clone());
        side
    }

    /// Takes in a freshly produced cell; true if it carried a value.
    fn advance(&mut self, s: Stream<T>) -> bool {
        let (a, tail) = match s {
            Stream::End(a) => (a, Tail::Done),
            Stream::Next(a, m) => (a, Tail::Cold(m)),
        };
        self.tail = tail;
        match a {
            Some(x) => {
                self.latest = Some(x);
                true
            }
            None => false,
        }
    }
}

type Combiner<T, U, R> = Arc<dyn Fn(&T, &U) -> R + Send + Sync>;

impl<T: Value> Stream<T> {
    /// Pairs the latest values of both streams.
    pub fn combine_latest<U: Value>(&self, other: &Stream<U>) -> Stream<(T, U)> {
        self.combine_latest_with(other, |x, y| (x.clone(), y.clone()))
    }

    /// Emits one cell per cell produced by either side.
    ///
    /// A cell carries `f` of the latest values once both sides have produced
    /// a value and the update itself carried one; ticks pass through as
    /// `None`. The result ends once both sides have ended.
    pub fn combine_latest_with<U, R, F>(&self, other: &Stream<U>, f: F) -> Stream<R>
    where
        U: Value,
        R: Value,
        F: Fn(&T, &U) -> R + Send + Sync + 'static,
    {
        let left = Side::new(self);
        let right = Side::new(other);
        let head = combined(&left, &right, &f);
        emit(head, left, right, Arc::new(f))
    }

    /// Pairs corresponding cells, stopping as soon as either side ends.
    ///
    /// Both tails are awaited together, so on hot streams a value that the
    /// faster side produces while the slower is still busy is lost.
    pub fn zip<U: Value>(&self, other: &Stream<U>) -> Stream<(T, U)> {
        let head = self.head().cloned().zip(other.head().cloned());
        match (self, other) {
            (Stream::Next(_, m1), Stream::Next(_, m2)) => Stream::Next(
                head,
                AsyncM::all(m1, m2).bind(|(s1, s2)| {
                    AsyncM::if_alive().map(move |_| s1.zip(&s2))
                }),
            ),
            _ => Stream::End(head),
        }
    }
}

fn combined<T, U, R>(
    left: &Side<T>,
    right: &Side<U>,
    f: &(dyn Fn(&T, &U) -> R + Send + Sync),
) -> Option<R> {
    match (&left.latest, &right.latest) {
        (Some(x), Some(y)) => Some(f(x, y)),
        _ => None,
    }
}

fn emit<T, U, R>(head: Option<R>, left: Side<T>, right: Side<U>, f: Combiner<T, U, R>) -> Stream<R>
where
    T: Value,
    U: Value,
    R: Value,
{
    if matches!((&left.tail, &right.tail), (Tail::Done, Tail::Done)) {
        Stream::End(head)
    } else {
        Stream::Next(head, step(left, right, f))
    }
}

/// Waits for whichever side produces next.
///
/// Only tails not yet in flight are started, and under the Progress of the
/// step itself; the side that does not move carries its hot tail into the
/// next step untouched.
fn step<T, U, R>(left: Side<T>, right: Side<U>, f: Combiner<T, U, R>) -> AsyncM<Stream<R>>
where
    T: Value,
    U: Value,
    R: Value,
{
    AsyncM::new(move |p| {
        let mut left = left.clone();
        let mut right = right.clone();
        let f = f.clone();
        async move {
            p.checkpoint().await;
            left.tail = core::mem::replace(&mut left.tail, Tail::Done).heat(&p);
            right.tail = core::mem::replace(&mut right.tail, Tail::Done).heat(&p);

            let moved = match (&left.tail, &right.tail) {
                (Tail::Hot(ml), Tail::Hot(mr)) => first_of(ml, mr, &p).await?,
                (Tail::Hot(ml), _) => Either::Left(ml.run(p.clone()).await?),
                (_, Tail::Hot(mr)) => Either::Right(mr.run(p.clone()).await?),
                _ => return Ok(Stream::End(None)),
            };

            let updated = match moved {
                Either::Left(s) => left.advance(s),
                Either::Right(s) => right.advance(s),
            };
            let head = if updated {
                combined(&left, &right, &*f)
            } else {
                None
            };
            tracing::trace!(updated, ready = head.is_some(), "combine step");
            Ok(emit(head, left, right, f))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    #[tokio::test(start_paused = true)]
    async fn combine_latest_pairs_with_the_latest_value() {
        let s = Stream::interval(ms(100), 3).combine_latest(&Stream::interval(ms(40), 4));
        let xs = s.collect().run(Progress::root()).await.unwrap();

        // 7 updates, the first of which only has one side
        assert_eq!(xs.len(), 6);
        assert_eq!(xs.last(), Some(&(3, 4)));
        assert!(xs.contains(&(1, 3)));
        assert!(xs.contains(&(2, 4)));
        // never pairs with a value from the future
        assert!(!xs.contains(&(1, 4)));
    }

    #[tokio::test(start_paused = true)]
    async fn combine_with_a_constant() {
        let s = Stream::interval(ms(10), 3).combine_latest_with(&Stream::pure(10), |x, y: &usize| x * y);
        let xs = s.collect().run(Progress::root()).await.unwrap();
        assert_eq!(xs, vec![10, 20, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn zip_stops_with_the_shorter_side() {
        let s = Stream::interval(ms(100), 2).zip(&Stream::interval(ms(10), 5));
        let xs = s.collect().run(Progress::root()).await.unwrap();
        assert_eq!(xs, vec![(1, 1), (2, 2)]);
    }
}
