use std::collections::{HashMap, VecDeque};
use std::fmt;

use tracing::debug;

use crate::bail;
use crate::completion::{CompletionTracker, Progress};
use crate::error::{ErrorKind, ReelResult};
use crate::types::{Batch, BatchKind, ClientId, Credit, Header, Movie, MovieReview, Review};

/// Lifecycle of a join session.
///
/// ```text
/// AwaitingMovies --movies complete, nothing buffered--> Joining
/// AwaitingMovies --movies complete, probes buffered---> Draining --buffer empty--> Joining
/// Joining --both probe streams complete--> Done
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The movie relation is still arriving; probe batches are buffered.
    AwaitingMovies,
    /// The movie relation is frozen and buffered probes are being replayed in arrival order.
    Draining,
    /// Probe batches are joined as soon as they arrive.
    Joining,
    /// Every probe stream is complete and the session can be destroyed.
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::AwaitingMovies => "awaiting_movies",
            SessionState::Draining => "draining",
            SessionState::Joining => "joining",
            SessionState::Done => "done",
        };

        f.write_str(name)
    }
}

/// The probe-side relations joined against the movies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Reviews,
    Credits,
}

impl Probe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Probe::Reviews => "reviews",
            Probe::Credits => "credits",
        }
    }
}

/// A probe batch held until the movie relation is complete.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingBatch {
    Reviews(Batch<Review>),
    Credits(Batch<Credit>),
}

impl PendingBatch {
    pub fn probe(&self) -> Probe {
        match self {
            PendingBatch::Reviews(_) => Probe::Reviews,
            PendingBatch::Credits(_) => Probe::Credits,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            PendingBatch::Reviews(batch) => &batch.header,
            PendingBatch::Credits(batch) => &batch.header,
        }
    }
}

/// Effect of a movie batch on its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoviesOutcome {
    /// The movie relation is still incomplete.
    Accumulating,
    /// The movie relation just completed. When `drain` is set buffered probes must be replayed
    /// before the session accepts live probes.
    Completed { drain: bool },
}

/// Frozen movie relation indexed by movie id.
///
/// Ids are not assumed unique: a movie id present twice in the relation joins every matching
/// review twice.
#[derive(Debug, Default)]
struct MovieTable {
    titles: HashMap<String, Vec<String>>,
}

impl MovieTable {
    fn build(movies: &[Movie]) -> Self {
        let mut titles: HashMap<String, Vec<String>> = HashMap::new();
        for movie in movies {
            titles
                .entry(movie.id.clone())
                .or_default()
                .push(movie.title.clone());
        }

        Self { titles }
    }

    fn titles(&self, movie_id: &str) -> &[String] {
        self.titles.get(movie_id).map_or(&[], Vec::as_slice)
    }

    fn contains(&self, movie_id: &str) -> bool {
        self.titles.contains_key(movie_id)
    }
}

/// Join state of one client, owned by the join loop of a shard.
///
/// The session accumulates the movie relation, tracks completion of the three input streams,
/// and buffers probe batches that arrive before the movies are complete so that no review is
/// ever joined against a partial movie set.
#[derive(Debug)]
pub struct JoinSession {
    client_id: ClientId,
    state: SessionState,
    movies: Vec<Movie>,
    table: MovieTable,
    movies_tracker: CompletionTracker,
    reviews_tracker: CompletionTracker,
    credits_tracker: CompletionTracker,
    pending: VecDeque<PendingBatch>,
    max_pending: usize,
}

impl JoinSession {
    pub fn new(client_id: ClientId, max_pending: usize) -> Self {
        Self {
            client_id,
            state: SessionState::AwaitingMovies,
            movies: Vec::new(),
            table: MovieTable::default(),
            movies_tracker: CompletionTracker::new(),
            reviews_tracker: CompletionTracker::new(),
            credits_tracker: CompletionTracker::new(),
            pending: VecDeque::new(),
            max_pending,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn movies(&self) -> &[Movie] {
        &self.movies
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` when probe batches are joined on arrival instead of being buffered.
    pub fn accepts_live_probes(&self) -> bool {
        self.state == SessionState::Joining
    }

    pub fn probe_tracker(&self, probe: Probe) -> &CompletionTracker {
        match probe {
            Probe::Reviews => &self.reviews_tracker,
            Probe::Credits => &self.credits_tracker,
        }
    }

    /// Accumulates a movie batch and freezes the relation once it is complete.
    ///
    /// Movie data arriving after the relation froze is rejected, since probes may already have
    /// been joined without it.
    pub fn add_movies(&mut self, batch: Batch<Movie>) -> ReelResult<MoviesOutcome> {
        if self.state != SessionState::AwaitingMovies {
            bail!(
                ErrorKind::ProtocolViolation,
                "Movie batch after the movie relation completed",
                format!(
                    "client {} is {}, batch carries weight {}",
                    self.client_id, self.state, batch.header.weight
                )
            );
        }

        let progress = self.movies_tracker.register(&batch.header)?;
        self.movies.extend(batch.data);

        if progress != Progress::Completed {
            return Ok(MoviesOutcome::Accumulating);
        }

        self.table = MovieTable::build(&self.movies);

        let drain = !self.pending.is_empty();
        self.state = if drain {
            SessionState::Draining
        } else {
            SessionState::Joining
        };

        debug!(
            client_id = %self.client_id,
            movies = self.movies.len(),
            pending = self.pending.len(),
            state = %self.state,
            "movie relation completed"
        );

        Ok(MoviesOutcome::Completed { drain })
    }

    /// Buffers a probe batch until the movie relation is complete.
    ///
    /// The batch weight is accounted immediately. Fails with
    /// [`ErrorKind::PendingBufferOverflow`] once the buffer is full, leaving the session unchanged.
    pub fn buffer(&mut self, batch: PendingBatch) -> ReelResult<Progress> {
        if self.state == SessionState::Joining || self.state == SessionState::Done {
            bail!(
                ErrorKind::InvalidState,
                "Probe batch buffered by a session accepting live probes",
                format!("client {} is {}", self.client_id, self.state)
            );
        }

        if self.pending.len() >= self.max_pending {
            bail!(
                ErrorKind::PendingBufferOverflow,
                "Pending probe buffer is full",
                format!(
                    "client {} buffered {} batches while awaiting movies",
                    self.client_id,
                    self.pending.len()
                )
            );
        }

        let tracker = match batch.probe() {
            Probe::Reviews => &mut self.reviews_tracker,
            Probe::Credits => &mut self.credits_tracker,
        };
        let progress = tracker.register(batch.header())?;

        self.pending.push_back(batch);

        Ok(progress)
    }

    /// Fails when `header` is a terminal marker for a probe stream that already declared its
    /// total. Run before a live probe is forwarded, since a duplicate terminal downstream would
    /// count as the terminal of another shard.
    pub fn check_probe(&self, probe: Probe, header: &Header) -> ReelResult<()> {
        match header.kind() {
            BatchKind::Terminal { total } => self.probe_tracker(probe).check_terminal(total),
            BatchKind::Data | BatchKind::Cleanup => Ok(()),
        }
    }

    /// Accounts a probe batch that was joined on arrival.
    pub fn register_probe(&mut self, probe: Probe, header: &Header) -> ReelResult<Progress> {
        match probe {
            Probe::Reviews => self.reviews_tracker.register(header),
            Probe::Credits => self.credits_tracker.register(header),
        }
    }

    /// Takes the oldest buffered batch for replay.
    pub fn next_pending(&mut self) -> Option<PendingBatch> {
        self.pending.pop_front()
    }

    /// Puts back a batch whose replay failed, keeping it first in line.
    pub fn restore_pending(&mut self, batch: PendingBatch) {
        self.pending.push_front(batch);
    }

    /// Ends the replay of buffered probes once the buffer is empty.
    pub fn finish_drain(&mut self) {
        if self.state == SessionState::Draining && self.pending.is_empty() {
            self.state = SessionState::Joining;
        }
    }

    /// Joins a review batch against the frozen movie relation.
    ///
    /// The output keeps the header of the input, so its weight is the number of reviews and not
    /// the number of joined rows.
    pub fn join_reviews(&self, batch: &Batch<Review>) -> Batch<MovieReview> {
        let joined = batch
            .data
            .iter()
            .flat_map(|review| {
                self.table
                    .titles(&review.movie_id)
                    .iter()
                    .map(|title| MovieReview {
                        movie_id: review.movie_id.clone(),
                        title: title.clone(),
                        rating: review.rating,
                    })
            })
            .collect();

        batch.with_data(joined)
    }

    /// Keeps the credits of movies present in the frozen movie relation, preserving the input
    /// header.
    pub fn filter_credits(&self, batch: &Batch<Credit>) -> Batch<Credit> {
        let filtered = batch
            .data
            .iter()
            .filter(|credit| self.table.contains(&credit.movie_id))
            .cloned()
            .collect();

        batch.with_data(filtered)
    }

    /// Moves the session to [`SessionState::Done`] when every probe stream is complete and no
    /// buffered batch is left, returning whether it did.
    pub fn try_finish(&mut self) -> bool {
        if self.state == SessionState::Done {
            return true;
        }

        let done = self.state == SessionState::Joining
            && self.pending.is_empty()
            && self.reviews_tracker.is_complete()
            && self.credits_tracker.is_complete();

        if done {
            self.state = SessionState::Done;
        }

        done
    }
}
