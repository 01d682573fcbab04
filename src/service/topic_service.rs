use std::{
    pin::Pin,
    sync::{atomic::Ordering, Arc},
};

use futures::{future, stream, Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::{CommandResponse, Publish, Subscribe, Unsubscribe, Value};

use super::topic::{Subscription, Topic};

pub type StreamingResponse = Pin<Box<dyn Stream<Item = Arc<CommandResponse>> + Send>>;

pub trait TopicService {
    fn execute(self, topic: impl Topic) -> StreamingResponse;
}

impl TopicService for Subscribe {
    fn execute(self, topic: impl Topic) -> StreamingResponse {
        let Subscription { id, rx, cancelled } = topic.subscribe(self.topic);

        // the first frame carries the subscription id
        let first = CommandResponse::from(Value::from(id as i64));

        // then everything published to the topic, until the queue closes or
        // the subscription is cancelled. A slow reader's queue head-drops;
        // the lag marker it leaves behind is skipped silently. The terminal
        // status 0 frame is produced here and nowhere else.
        let data = BroadcastStream::new(rx)
            .filter_map(|item| future::ready(item.ok()))
            .take_while(move |_| future::ready(!cancelled.load(Ordering::Acquire)));

        Box::pin(
            stream::once(future::ready(Arc::new(first)))
                .chain(data)
                .chain(stream::once(future::ready(Arc::new(
                    CommandResponse::stream_closed(),
                )))),
        )
    }
}

impl TopicService for Unsubscribe {
    fn execute(self, topic: impl Topic) -> StreamingResponse {
        let res = match topic.unsubscribe(self.topic, self.id) {
            Ok(_) => CommandResponse::ok(),
            Err(e) => e.into(),
        };
        Box::pin(stream::once(future::ready(Arc::new(res))))
    }
}

impl TopicService for Publish {
    fn execute(self, topic: impl Topic) -> StreamingResponse {
        // each published value becomes its own response frame
        let data = self
            .values
            .into_iter()
            .map(|v| Arc::new(CommandResponse::from(v)))
            .collect();
        topic.publish(self.topic, data);

        Box::pin(stream::once(future::ready(Arc::new(CommandResponse::ok()))))
    }
}
