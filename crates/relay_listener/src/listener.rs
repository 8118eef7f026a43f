//! The push protocol handler.

use crate::adapter::{PushAdapter, TransactionScope};
use crate::config::ListenerConfig;
use crate::error::{ListenerError, ListenerResult};
use relay_protocol::{Cursor, PushInput, PushOutput, ReadLine, UNKNOWN_SERVER};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives pushes for one subscription and applies them through an adapter.
///
/// The listener keeps no state between calls. Everything it answers with
/// comes from the adapter's durable cursor table, read inside the same
/// transaction that applies the push. A pusher retrying after a crash or a
/// lost response is therefore always re-validated against what actually
/// committed.
pub struct PushListener<A: PushAdapter> {
    config: ListenerConfig,
    adapter: Arc<A>,
}

impl<A: PushAdapter> PushListener<A> {
    /// Creates a listener.
    pub fn new(config: ListenerConfig, adapter: Arc<A>) -> Self {
        Self { config, adapter }
    }

    /// The subscription this listener serves.
    pub fn subscription_id(&self) -> &str {
        &self.config.subscription_id
    }

    /// Listener configuration.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// The storage adapter.
    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// Validates, applies and acknowledges one push atomically.
    ///
    /// `IncorrectSubscriptionId` and `IncorrectBaseOffset` are answers, not
    /// errors, and they take precedence over a malformed batch. An `Err`
    /// means the transaction rolled back and nothing changed.
    pub fn push(&self, input: &PushInput) -> ListenerResult<PushOutput> {
        self.adapter
            .wrap_transaction(|scope| self.push_in_transaction(input, scope))
    }

    fn validate_lines(&self, input: &PushInput) -> ListenerResult<()> {
        let lines = &input.read.lines;
        if lines.len() > self.config.max_push_lines {
            return Err(ListenerError::InvalidRequest(format!(
                "too many lines: {} > {}",
                lines.len(),
                self.config.max_push_lines
            )));
        }

        let stream = input.read.from_offset.stream();
        if let Some(line) = lines.iter().find(|l| l.ptr_after().stream() != stream) {
            return Err(ListenerError::InvalidRequest(format!(
                "line cursor {} does not belong to stream {}",
                line.ptr_after(),
                stream
            )));
        }

        Ok(())
    }

    fn push_in_transaction(
        &self,
        input: &PushInput,
        scope: &mut TransactionScope<'_, A>,
    ) -> ListenerResult<PushOutput> {
        if input.subscription_id != self.config.subscription_id {
            warn!(
                got = %input.subscription_id,
                expected = %self.config.subscription_id,
                "push for another subscription"
            );
            return Ok(PushOutput::incorrect_subscription_id(
                self.config.subscription_id.clone(),
            ));
        }

        let from_offset = &input.read.from_offset;
        let stream = from_offset.stream();
        let stored = stored_offset(scope, stream)?;

        if !from_offset.position_equals(&stored) {
            if !input.is_offset_query() {
                info!(
                    stream,
                    pushed = %from_offset.offset_string(),
                    stored = %stored.offset_string(),
                    "push base offset does not match"
                );
            }
            return Ok(PushOutput::incorrect_base_offset(stored));
        }

        self.validate_lines(input)?;

        // Until a stream is found behind, acceptance follows the lines. After
        // that, nothing further is applied or acknowledged in this push.
        let mut accepted = stored;
        let mut behind: BTreeMap<String, Cursor> = BTreeMap::new();

        for line in &input.read.lines {
            match line {
                ReadLine::Meta {
                    subscription_activity,
                    ..
                } => {
                    for remote in subscription_activity {
                        if behind.contains_key(remote.stream()) {
                            continue;
                        }

                        let ours = stored_offset(scope, remote.stream())?;
                        if remote.is_ahead_of(&ours) {
                            info!(
                                stream = remote.stream(),
                                ours = %ours.offset_string(),
                                remote = %remote.offset_string(),
                                "behind on subscribed stream"
                            );
                            behind.insert(remote.stream().to_string(), ours);
                        }
                    }
                }
                ReadLine::Content { content, .. } => {
                    if behind.is_empty() {
                        if content.is_empty() {
                            debug!(stream, "applying empty event line");
                        }
                        scope.apply_event(content)?;
                    }
                }
            }

            if behind.is_empty() {
                accepted = line.ptr_after().clone();
            }
        }

        scope.set_offset(stream, &accepted)?;

        debug!(
            stream,
            accepted = %accepted.offset_string(),
            lines = input.read.lines.len(),
            behind = behind.len(),
            "push accepted"
        );

        Ok(PushOutput::success(accepted, behind.into_values().collect()))
    }
}

/// Stored cursor for `stream`, or its beginning if nothing was recorded.
///
/// Every stream pushed under our subscription is one we follow, so an
/// unknown stream simply starts at the beginning.
fn stored_offset<A: PushAdapter>(
    scope: &mut TransactionScope<'_, A>,
    stream: &str,
) -> ListenerResult<Cursor> {
    Ok(scope
        .get_offset(stream)?
        .unwrap_or_else(|| Cursor::beginning_of_stream(stream, UNKNOWN_SERVER)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;
    use relay_protocol::{PushCode, ReadResult};

    const SUB: &str = "sub-1";

    fn at(stream: &str, offset: i64) -> Cursor {
        Cursor::new(stream, 0, offset, "w1")
    }

    fn create_listener() -> PushListener<MemoryAdapter> {
        PushListener::new(ListenerConfig::new(SUB), Arc::new(MemoryAdapter::new()))
    }

    fn content_push(from: Cursor, events: &[&str]) -> PushInput {
        let lines = events
            .iter()
            .enumerate()
            .map(|(i, e)| {
                ReadLine::content(
                    *e,
                    from.with_position(0, from.position().offset + 10 * (i as i64 + 1)),
                )
            })
            .collect();
        PushInput::new(SUB, ReadResult::new(from, lines))
    }

    #[test]
    fn fresh_stream_three_lines() {
        let listener = create_listener();
        let push = content_push(Cursor::beginning_of_stream("/s", "w1"), &["a", "b", "c"]);

        let output = listener.push(&push).unwrap();

        assert_eq!(output.code, PushCode::Success);
        assert_eq!(output.accepted_offset, Some(at("/s", 30)));
        assert!(output.behind_cursors.is_empty());
        assert_eq!(listener.adapter().events(), vec!["a", "b", "c"]);
        assert_eq!(listener.adapter().offset("/s"), Some(at("/s", 30)));
    }

    #[test]
    fn stale_from_offset() {
        let listener = create_listener();
        listener.adapter().seed_offset(&at("/s", 50));

        let output = listener.push(&content_push(at("/s", 20), &["x"])).unwrap();

        assert_eq!(output.code, PushCode::IncorrectBaseOffset);
        assert_eq!(output.accepted_offset, Some(at("/s", 50)));
        assert!(listener.adapter().events().is_empty());
        assert_eq!(listener.adapter().offset("/s"), Some(at("/s", 50)));
    }

    #[test]
    fn offset_query_reports_beginning_for_unknown_stream() {
        let listener = create_listener();
        let output = listener.push(&PushInput::offset_query(SUB, "/new")).unwrap();

        assert_eq!(output.code, PushCode::IncorrectBaseOffset);
        assert_eq!(
            output.accepted_offset,
            Some(Cursor::beginning_of_stream("/new", UNKNOWN_SERVER))
        );
        assert_eq!(listener.adapter().offset("/new"), None);
    }

    #[test]
    fn wrong_subscription_has_no_side_effects() {
        let listener = create_listener();
        let mut push = content_push(Cursor::beginning_of_stream("/s", "w1"), &["a"]);
        push.subscription_id = "someone-else".into();

        let output = listener.push(&push).unwrap();

        assert_eq!(output.code, PushCode::IncorrectSubscriptionId);
        assert_eq!(output.correct_subscription_id.as_deref(), Some(SUB));
        assert!(listener.adapter().events().is_empty());
        assert_eq!(listener.adapter().offset("/s"), None);
    }

    #[test]
    fn server_name_does_not_affect_base_check() {
        let listener = create_listener();
        listener.adapter().seed_offset(&Cursor::new("/s", 0, 10, "old-host"));

        let output = listener
            .push(&content_push(Cursor::new("/s", 0, 10, "new-host"), &["a"]))
            .unwrap();
        assert_eq!(output.code, PushCode::Success);
    }

    #[test]
    fn behind_cursor_stops_acceptance() {
        let listener = create_listener();
        listener.adapter().seed_offset(&at("/followed", 5));
        let sub_stream = "/_subscriptions/sub-1";
        let from = Cursor::beginning_of_stream(sub_stream, "w1");

        let push = PushInput::new(
            SUB,
            ReadResult::new(
                from.clone(),
                vec![
                    // Receiver already has /followed at 5: not behind.
                    ReadLine::subscription_activity(vec![at("/followed", 5)], at(sub_stream, 10)),
                    ReadLine::subscription_activity(vec![at("/followed", 9)], at(sub_stream, 20)),
                    ReadLine::subscription_activity(vec![at("/followed", 12)], at(sub_stream, 30)),
                    ReadLine::content("late", at(sub_stream, 40)),
                ],
            ),
        );

        let output = listener.push(&push).unwrap();

        assert_eq!(output.code, PushCode::Success);
        assert_eq!(output.accepted_offset, Some(at(sub_stream, 10)));
        assert_eq!(output.behind_cursors, vec![at("/followed", 5)]);
        assert!(listener.adapter().events().is_empty());
        assert_eq!(listener.adapter().offset(sub_stream), Some(at(sub_stream, 10)));
    }

    #[test]
    fn behind_cursors_for_unknown_streams_start_at_beginning() {
        let listener = create_listener();
        let sub_stream = "/_subscriptions/sub-1";

        let push = PushInput::new(
            SUB,
            ReadResult::new(
                Cursor::beginning_of_stream(sub_stream, "w1"),
                vec![ReadLine::subscription_activity(
                    vec![at("/b", 3), at("/a", 7), at("/b", 9)],
                    at(sub_stream, 10),
                )],
            ),
        );

        let output = listener.push(&push).unwrap();

        assert_eq!(
            output.accepted_offset,
            Some(Cursor::beginning_of_stream(sub_stream, UNKNOWN_SERVER))
        );
        assert_eq!(
            output.behind_cursors,
            vec![
                Cursor::beginning_of_stream("/a", UNKNOWN_SERVER),
                Cursor::beginning_of_stream("/b", UNKNOWN_SERVER),
            ]
        );
    }

    #[test]
    fn event_failure_rolls_back_whole_push() {
        let adapter = Arc::new(MemoryAdapter::new().with_validator(|c| {
            if c == "poison" {
                Err("poison".into())
            } else {
                Ok(())
            }
        }));
        let listener = PushListener::new(ListenerConfig::new(SUB), Arc::clone(&adapter));

        let result = listener.push(&content_push(
            Cursor::beginning_of_stream("/s", "w1"),
            &["a", "poison", "c"],
        ));

        assert!(matches!(result, Err(ListenerError::Event(_))));
        assert!(adapter.events().is_empty());
        assert_eq!(adapter.offset("/s"), None);
    }

    #[test]
    fn retry_after_storage_failure_matches_first_attempt() {
        let listener = create_listener();
        let push = content_push(Cursor::beginning_of_stream("/s", "w1"), &["a", "b", "c"]);

        listener.adapter().inject_storage_failure(1);
        let first = listener.push(&push);
        assert!(matches!(first, Err(ListenerError::Storage(_))));
        assert_eq!(listener.adapter().offset("/s"), None);

        let second = listener.push(&push).unwrap();
        assert_eq!(second.code, PushCode::Success);
        assert_eq!(second.accepted_offset, Some(at("/s", 30)));
        assert_eq!(listener.adapter().events(), vec!["a", "b", "c"]);
    }

    #[test]
    fn replayed_push_is_rejected_not_reapplied() {
        let listener = create_listener();
        let push = content_push(Cursor::beginning_of_stream("/s", "w1"), &["a"]);

        listener.push(&push).unwrap();
        let again = listener.push(&push).unwrap();

        assert_eq!(again.code, PushCode::IncorrectBaseOffset);
        assert_eq!(again.accepted_offset, Some(at("/s", 10)));
        assert_eq!(listener.adapter().events().len(), 1);
    }

    #[test]
    fn rejects_foreign_line_cursor() {
        let listener = create_listener();
        let push = PushInput::new(
            SUB,
            ReadResult::new(
                Cursor::beginning_of_stream("/s", "w1"),
                vec![ReadLine::content("a", at("/other", 10))],
            ),
        );

        assert!(matches!(
            listener.push(&push),
            Err(ListenerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn rejects_oversized_push() {
        let adapter = Arc::new(MemoryAdapter::new());
        let listener =
            PushListener::new(ListenerConfig::new(SUB).with_max_push_lines(1), adapter);
        let push = content_push(Cursor::beginning_of_stream("/s", "w1"), &["a", "b"]);

        assert!(matches!(
            listener.push(&push),
            Err(ListenerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn wrong_subscription_wins_over_malformed_lines() {
        let listener = PushListener::new(
            ListenerConfig::new(SUB).with_max_push_lines(1),
            Arc::new(MemoryAdapter::new()),
        );
        let foreign = PushInput::new(
            "someone-else",
            ReadResult::new(
                Cursor::beginning_of_stream("/s", "w1"),
                vec![ReadLine::content("a", at("/other", 1))],
            ),
        );
        let mut oversized = content_push(Cursor::beginning_of_stream("/s", "w1"), &["a", "b"]);
        oversized.subscription_id = "someone-else".into();

        for push in [foreign, oversized] {
            let output = listener.push(&push).unwrap();
            assert_eq!(output.code, PushCode::IncorrectSubscriptionId);
            assert_eq!(output.correct_subscription_id.as_deref(), Some(SUB));
        }
        assert!(listener.adapter().events().is_empty());
    }

    #[test]
    fn stale_base_wins_over_malformed_lines() {
        let listener = PushListener::new(
            ListenerConfig::new(SUB).with_max_push_lines(1),
            Arc::new(MemoryAdapter::new()),
        );
        listener.adapter().seed_offset(&at("/s", 50));

        let oversized = content_push(at("/s", 20), &["a", "b"]);
        let foreign = PushInput::new(
            SUB,
            ReadResult::new(at("/s", 20), vec![ReadLine::content("a", at("/other", 1))]),
        );

        for push in [oversized, foreign] {
            let output = listener.push(&push).unwrap();
            assert_eq!(output.code, PushCode::IncorrectBaseOffset);
            assert_eq!(output.accepted_offset, Some(at("/s", 50)));
        }
        assert!(listener.adapter().events().is_empty());
        assert_eq!(listener.adapter().offset("/s"), Some(at("/s", 50)));
    }
}
