//! A durable, append-only file [`LogStore`] (§6). Three files live under the data
//! directory: `hard_state`, rewritten whole on every vote/term change, and `mutations` /
//! `events`, which only ever grow — each a sequence of 4-byte big-endian length-prefixed
//! frames holding a [`Mutation::encode`]/[`Event::encode`] payload. Byte offsets into those
//! two files are cached in memory so random fetch by [`GlobalOffset`]/[`LocalOffset`] never
//! has to rescan from the start; the cache is rebuilt from the files themselves on open, so
//! nothing but the frames on disk is load-bearing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::Mutex;

use laminar_core::event::Event;
use laminar_core::ids::{GlobalOffset, LocalOffset};
use laminar_core::log_store::{HardState, InitialState, LogStore};
use laminar_core::mutation::Mutation;

const HARD_STATE_FILE: &str = "hard_state";
const MUTATIONS_FILE: &str = "mutations";
const EVENTS_FILE: &str = "events";

struct Inner {
    hard_state_path: PathBuf,
    hard_state: HardState,
    mutations: File,
    mutation_index: BTreeMap<GlobalOffset, (u64, u32)>,
    events: File,
    event_index: BTreeMap<String, BTreeMap<LocalOffset, (u64, u32)>>,
    last_committed_offset: GlobalOffset,
}

/// A durable [`LogStore`] backed by a directory of append-only files.
pub struct FileLogStore {
    inner: Mutex<Inner>,
}

impl FileLogStore {
    /// Open (creating if absent) the store rooted at `dir`, replaying `mutations` and
    /// `events` to rebuild the in-memory offset index.
    pub async fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;

        let hard_state_path = dir.join(HARD_STATE_FILE);
        let hard_state = read_hard_state(&hard_state_path).await?;

        let mut mutations = OpenOptions::new().create(true).read(true).append(true).open(dir.join(MUTATIONS_FILE)).await?;
        let mutation_index = index_frames(&mut mutations, |buf| Mutation::decode(buf).map(|m| m.global_offset)).await?;

        let mut events = OpenOptions::new().create(true).read(true).append(true).open(dir.join(EVENTS_FILE)).await?;
        let mut event_index: BTreeMap<String, BTreeMap<LocalOffset, (u64, u32)>> = BTreeMap::new();
        for_each_frame(&mut events, |pos, len, buf| {
            let event = Event::decode(buf)?;
            event_index.entry(event.topic).or_default().insert(event.local_offset, (pos, len));
            Ok(())
        })
        .await?;

        let last_committed_offset = mutation_index.keys().next_back().copied().unwrap_or(0);

        Ok(Self {
            inner: Mutex::new(Inner { hard_state_path, hard_state, mutations, mutation_index, events, event_index, last_committed_offset }),
        })
    }
}

async fn read_hard_state(path: &Path) -> anyhow::Result<HardState> {
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HardState::default()),
        Err(e) => Err(e.into()),
    }
}

/// Replay every length-prefixed frame in `file`, calling `f(position_of_frame, len, payload)`.
async fn for_each_frame(file: &mut File, mut f: impl FnMut(u64, u32, &[u8]) -> anyhow::Result<()>) -> anyhow::Result<()> {
    file.seek(SeekFrom::Start(0)).await?;
    let mut pos = 0u64;
    loop {
        let mut len_buf = [0u8; 4];
        match file.read_exact(&mut len_buf).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf);
        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload).await?;
        f(pos, len, &payload)?;
        pos += 4 + len as u64;
    }
    Ok(())
}

async fn index_frames<K: Ord>(file: &mut File, mut key_of: impl FnMut(&[u8]) -> laminar_core::wire::WireResult<K>) -> anyhow::Result<BTreeMap<K, (u64, u32)>> {
    let mut index = BTreeMap::new();
    for_each_frame(file, |pos, len, buf| {
        let key = key_of(buf)?;
        index.insert(key, (pos, len));
        Ok(())
    })
    .await?;
    Ok(index)
}

/// Append `payload` to `file` as a 4-byte-length-prefixed frame, fsync, and return the
/// frame's starting byte position.
async fn append_frame(file: &mut File, payload: &[u8]) -> anyhow::Result<(u64, u32)> {
    let pos = file.seek(SeekFrom::End(0)).await?;
    file.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    file.write_all(payload).await?;
    file.sync_data().await?;
    Ok((pos, payload.len() as u32))
}

async fn read_frame(file: &mut File, pos: u64, len: u32) -> anyhow::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(pos + 4)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn get_initial_state(&self) -> anyhow::Result<InitialState> {
        let inner = self.inner.lock().await;
        Ok(InitialState { hard_state: inner.hard_state.clone(), last_committed_offset: inner.last_committed_offset })
    }

    async fn save_hard_state(&self, hs: &HardState) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let bytes = serde_json::to_vec(hs)?;
        let tmp = inner.hard_state_path.with_extension("tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &inner.hard_state_path).await?;
        inner.hard_state = hs.clone();
        Ok(())
    }

    async fn commit(&self, mutation: Mutation, events: Vec<Event>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        let offset = mutation.global_offset;

        let mutation_bytes = mutation.encode()?;
        let loc = append_frame(&mut inner.mutations, &mutation_bytes).await?;
        inner.mutation_index.insert(offset, loc);

        for event in &events {
            let bytes = event.encode()?;
            let loc = append_frame(&mut inner.events, &bytes).await?;
            inner.event_index.entry(event.topic.clone()).or_default().insert(event.local_offset, loc);
        }

        inner.last_committed_offset = offset;
        Ok(())
    }

    async fn fetch_mutation(&self, offset: GlobalOffset) -> anyhow::Result<Option<Mutation>> {
        let mut inner = self.inner.lock().await;
        let loc = match inner.mutation_index.get(&offset) {
            Some(&loc) => loc,
            None => return Ok(None),
        };
        let bytes = read_frame(&mut inner.mutations, loc.0, loc.1).await?;
        Ok(Some(Mutation::decode(&bytes)?))
    }

    async fn fetch_mutations(&self, start: GlobalOffset, end: GlobalOffset) -> anyhow::Result<Vec<Mutation>> {
        let mut inner = self.inner.lock().await;
        let locs: Vec<(u64, u32)> = inner.mutation_index.range(start..end).map(|(_, &loc)| loc).collect();
        let mut out = Vec::with_capacity(locs.len());
        for loc in locs {
            let bytes = read_frame(&mut inner.mutations, loc.0, loc.1).await?;
            out.push(Mutation::decode(&bytes)?);
        }
        Ok(out)
    }

    async fn fetch_events(&self, topic: &str, start: LocalOffset, end: LocalOffset) -> anyhow::Result<Vec<Event>> {
        let mut inner = self.inner.lock().await;
        let locs: Vec<(u64, u32)> = match inner.event_index.get(topic) {
            Some(by_offset) => by_offset.range(start..end).map(|(_, &loc)| loc).collect(),
            None => return Ok(Vec::new()),
        };
        let mut out = Vec::with_capacity(locs.len());
        for loc in locs {
            let bytes = read_frame(&mut inner.events, loc.0, loc.1).await?;
            out.push(Event::decode(&bytes)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use laminar_core::event::EventPayload;
    use laminar_core::ids::ClientId;
    use laminar_core::mutation::MutationPayload;

    fn mutation(offset: u64) -> Mutation {
        Mutation { term: 1, global_offset: offset, topic: "orders".into(), client_id: ClientId(1), client_nonce: offset, payload: MutationPayload::Put { key: vec![1], value: vec![2] } }
    }

    fn event(offset: u64, local: u64) -> Event {
        Event {
            term: 1,
            global_offset: offset,
            local_offset: local,
            topic: "orders".into(),
            client_id: ClientId(1),
            client_nonce: offset,
            payload: EventPayload::KeyPut { key: vec![1], value: vec![2] },
        }
    }

    #[tokio::test]
    async fn commit_then_fetch_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLogStore::open(dir.path()).await.unwrap();
        store.commit(mutation(1), vec![event(1, 1)]).await.unwrap();
        store.commit(mutation(2), vec![event(2, 2)]).await.unwrap();

        let fetched = store.fetch_mutations(1, 3).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(store.fetch_mutation(1).await.unwrap(), Some(mutation(1)));

        let events = store.fetch_events("orders", 1, 3).await.unwrap();
        assert_eq!(events.len(), 2);

        let initial = store.get_initial_state().await.unwrap();
        assert_eq!(initial.last_committed_offset, 2);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileLogStore::open(dir.path()).await.unwrap();
            store.save_hard_state(&HardState { current_term: 4, voted_for: Some(laminar_core::ids::NodeId(9)) }).await.unwrap();
            store.commit(mutation(1), vec![event(1, 1)]).await.unwrap();
        }

        let reopened = FileLogStore::open(dir.path()).await.unwrap();
        let initial = reopened.get_initial_state().await.unwrap();
        assert_eq!(initial.hard_state.current_term, 4);
        assert_eq!(initial.last_committed_offset, 1);
        assert_eq!(reopened.fetch_mutation(1).await.unwrap(), Some(mutation(1)));
    }
}
