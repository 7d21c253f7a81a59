use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use futures::stream;
use pretty_assertions::assert_eq;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::*;

const LATENCY: Duration = Duration::from_millis(10);

fn tens(fetches: &Arc<AtomicUsize>) -> LocalDocument<u32, u32, String> {
	let fetches = Arc::clone(fetches);
	LocalDocument::new("tens", move |variables: Option<u32>| {
		fetches.fetch_add(1, Ordering::SeqCst);
		async move {
			sleep(LATENCY).await;
			match variables {
				Some(0) => Err(String::from("zero")),
				Some(n) => Ok(Some(n * 10)),
				None => Ok(None),
			}
		}
	})
}

async fn settle() {
	sleep(LATENCY * 2).await;
}

#[tokio::test(start_paused = true)]
async fn start_fetches_and_publishes() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().variables(4));
	let responses = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&responses);
	let _listener = query.on_result(Box::new(move |response: &QueryResponse<u32>| sink.lock().push(response.clone())));

	assert!(query.start().is_ok());
	assert!(query.is_active());
	assert_eq!(query.result().get(), ResultSlot::Unset);
	settle().await;

	assert_eq!(query.result().get(), ResultSlot::Value(40));
	assert_eq!(*responses.lock(), vec![QueryResponse::with_status(None, NetworkStatus::Loading), QueryResponse::ready(Some(40))]);
	assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_and_cache_first_skips_fetch() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().variables(1));

	assert!(query.start().is_ok());
	assert!(query.start().is_ok());
	settle().await;
	query.stop();
	assert!(query.start().is_ok());
	settle().await;

	assert_eq!(fetches.load(Ordering::SeqCst), 1);
	assert_eq!(query.result().get(), ResultSlot::Value(10));
}

#[tokio::test(start_paused = true)]
async fn network_only_fetches_on_every_start() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let options = LocalOptions::default().variables(1).fetch_policy(FetchPolicy::NetworkOnly);
	let query = LocalQuery::with_options(tens(&fetches), options);

	assert!(query.start().is_ok());
	settle().await;
	query.stop();
	assert!(query.start().is_ok());
	settle().await;

	assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn stopped_query_cannot_refetch_or_fetch_more() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::new(tens(&fetches));

	assert!(query.refetch(None).is_none());
	assert!(query.fetch_more(LocalFetchMore::new(Some(1), |_, next| next)).is_none());
	assert_eq!(fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn refetch_with_variables_resets_result_first() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().variables(1));
	assert!(query.start().is_ok());
	settle().await;

	let pending = query.refetch(Some(2));
	assert_eq!(query.result().get(), ResultSlot::Unset);
	let response = pending.expect("active query refetches").await;

	assert_eq!(response, Ok(QueryResponse::ready(Some(20))));
	assert_eq!(query.result().get(), ResultSlot::Value(20));
	assert_eq!(query.variables(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_publishes_error_and_success_clears_it() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().variables(0));
	assert!(query.start().is_ok());
	settle().await;

	assert_eq!(query.error().get(), Some(String::from("zero")));
	assert_eq!(query.result().get(), ResultSlot::Unset);

	let response = query.refetch(Some(3)).expect("active").await;
	assert_eq!(response.map(|r| r.data), Ok(Some(30)));
	assert_eq!(query.error().get(), None);
}

#[tokio::test(start_paused = true)]
async fn empty_payload_settles_to_empty_slot() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::new(tens(&fetches));
	assert!(query.start().is_ok());
	settle().await;

	assert_eq!(query.result().get(), ResultSlot::Empty);
}

#[tokio::test(start_paused = true)]
async fn result_of_stopped_epoch_is_discarded() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().variables(5));

	assert!(query.start().is_ok());
	query.stop();
	settle().await;

	assert_eq!(fetches.load(Ordering::SeqCst), 1);
	assert_eq!(query.result().get(), ResultSlot::Unset);
}

#[tokio::test(start_paused = true)]
async fn fetch_more_merges_into_result() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().variables(1));
	assert!(query.start().is_ok());
	settle().await;

	let more = LocalFetchMore::new(Some(2), |previous: Option<u32>, next: Option<u32>| Some(previous.unwrap_or(0) + next.unwrap_or(0)));
	let response = query.fetch_more(more).expect("active").await;

	assert_eq!(response, Ok(QueryResponse::ready(Some(20))));
	assert_eq!(query.result().get(), ResultSlot::Value(30));
	assert_eq!(query.variables(), Some(1));
}

#[tokio::test(start_paused = true)]
async fn subscribe_to_more_merges_updates() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().variables(1));
	assert!(query.start().is_ok());
	settle().await;

	let reported = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&reported);
	let _listener = query.on_result(Box::new(move |response: &QueryResponse<u32>| sink.lock().push(response.data)));

	let updates = stream::iter([1u32, 2, 3]).boxed();
	query.subscribe_to_more(LocalSubscription::new(updates, |previous, update| previous.unwrap_or(0) + update));
	settle().await;

	assert_eq!(query.result().get(), ResultSlot::Value(16));
	assert_eq!(*reported.lock(), vec![Some(11), Some(13), Some(16)]);
}

#[tokio::test(start_paused = true)]
async fn stopped_query_ignores_new_subscriptions() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().variables(1));
	assert!(query.start().is_ok());
	settle().await;
	query.stop();

	let updates = stream::iter([7u32, 8]).boxed();
	query.subscribe_to_more(LocalSubscription::new(updates, |_, update| update));
	settle().await;
	query.stop();

	assert!(!query.is_active());
	assert_eq!(query.result().get(), ResultSlot::Value(10));
}

#[tokio::test(start_paused = true)]
async fn stop_ends_subscriptions() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().variables(1));
	assert!(query.start().is_ok());
	settle().await;

	let updates = stream::unfold(0u32, |n| async move {
		sleep(LATENCY).await;
		Some((1, n + 1))
	})
	.boxed();
	query.subscribe_to_more(LocalSubscription::new(updates, |previous, update| previous.unwrap_or(0) + update));
	sleep(LATENCY + LATENCY / 2).await;
	query.stop();
	let frozen = query.result().get();
	settle().await;

	assert_eq!(frozen, ResultSlot::Value(11));
	assert_eq!(query.result().get(), frozen);
}

#[tokio::test(start_paused = true)]
async fn lazy_query_waits_for_load() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().lazy());
	assert_eq!(query.activation(), Activation::Lazy);

	assert!(query.start().is_ok());
	settle().await;
	assert_eq!(fetches.load(Ordering::SeqCst), 0);

	query.load(Some(7), Some(FetchPolicy::NetworkOnly));
	settle().await;

	assert_eq!(fetches.load(Ordering::SeqCst), 1);
	assert_eq!(query.result().get(), ResultSlot::Value(70));
}

#[tokio::test(start_paused = true)]
async fn load_with_new_variables_fetches_again() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().lazy());
	query.load(Some(1), None);
	settle().await;
	assert_eq!(query.result().get(), ResultSlot::Value(10));

	query.load(Some(2), None);
	assert_eq!(query.result().get(), ResultSlot::Unset);
	settle().await;

	assert_eq!(query.variables(), Some(2));
	assert_eq!(query.result().get(), ResultSlot::Value(20));
	assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn load_without_variables_keeps_cached_result() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().lazy().variables(3));
	query.load(None, None);
	settle().await;
	query.load(None, None);
	settle().await;

	assert_eq!(fetches.load(Ordering::SeqCst), 1);
	assert_eq!(query.result().get(), ResultSlot::Value(30));
}

#[tokio::test(start_paused = true)]
async fn responses_report_network_status() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let query = LocalQuery::with_options(tens(&fetches), LocalOptions::default().variables(1));
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let listener = query.on_result(Box::new(move |response: &QueryResponse<u32>| {
		sink.lock().push((response.network_status, response.loading, response.data));
	}));

	assert!(query.start().is_ok());
	settle().await;
	assert!(query.refetch(None).expect("active").await.is_ok());
	let more = LocalFetchMore::new(Some(2), |previous: Option<u32>, next: Option<u32>| Some(previous.unwrap_or(0) + next.unwrap_or(0)));
	assert!(query.fetch_more(more).expect("active").await.is_ok());
	assert_eq!(query.refetch(Some(0)).expect("active").await, Err(String::from("zero")));
	assert!(listener.stop());
	assert!(query.refetch(Some(4)).expect("active").await.is_ok());

	assert_eq!(
		*seen.lock(),
		vec![
			(NetworkStatus::Loading, true, None),
			(NetworkStatus::Ready, false, Some(10)),
			(NetworkStatus::Refetch, true, Some(10)),
			(NetworkStatus::Ready, false, Some(10)),
			(NetworkStatus::FetchMore, true, Some(10)),
			(NetworkStatus::Ready, false, Some(30)),
			(NetworkStatus::SetVariables, true, None),
			(NetworkStatus::Error, false, None),
		]
	);
}

#[tokio::test(start_paused = true)]
async fn client_runs_document_fetch() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let request = QueryRequest {
		document: tens(&fetches),
		variables: Some(6),
		cancel: CancellationToken::new(),
	};

	let response = QueryClient::<LocalQuery<u32, u32, String>>::query(&LocalClient, request).await;

	assert_eq!(response, Ok(QueryResponse::ready(Some(60))));
}

#[tokio::test(start_paused = true)]
async fn client_drops_fetch_once_cancelled() {
	let fetches = Arc::new(AtomicUsize::new(0));
	let cancel = CancellationToken::new();
	let request = QueryRequest {
		document: tens(&fetches),
		variables: Some(6),
		cancel: cancel.clone(),
	};
	let pending = QueryClient::<LocalQuery<u32, u32, String>>::query(&LocalClient, request);
	cancel.cancel();

	assert!(tokio::time::timeout(Duration::from_secs(1), pending).await.is_err());
}
