use crate::*;

impl CommandService for Hget {
    fn execute(self, store: &impl Storage) -> CommandResponse {
        match store.get(&self.table, &self.key) {
            Ok(Some(v)) => v.into(),
            Ok(None) => KvError::NotFound(self.table, self.key).into(),
            Err(e) => e.into(),
        }
    }
}

impl CommandService for Hgetall {
    fn execute(self, store: &impl Storage) -> CommandResponse {
        match store.get_all(&self.table) {
            Ok(v) => v.into(),
            Err(e) => e.into(),
        }
    }
}

impl CommandService for Hmget {
    fn execute(self, store: &impl Storage) -> CommandResponse {
        // positional result, missing keys become null values
        self.keys
            .iter()
            .map(|key| match store.get(&self.table, key) {
                Ok(Some(v)) => v,
                _ => Value::default(),
            })
            .collect::<Vec<_>>()
            .into()
    }
}

impl CommandService for Hset {
    fn execute(self, store: &impl Storage) -> CommandResponse {
        match self.pair {
            None => Value::default().into(),
            Some(v) => match store.set(&self.table, v.key, v.value.unwrap_or_default()) {
                Ok(Some(v)) => v.into(),
                Ok(None) => Value::default().into(),
                Err(e) => e.into(),
            },
        }
    }
}

impl CommandService for Hmset {
    fn execute(self, store: &impl Storage) -> CommandResponse {
        let table = self.table;
        // prior values in request order, like a batch of hset
        self.pairs
            .into_iter()
            .map(
                |pair| match store.set(&table, pair.key, pair.value.unwrap_or_default()) {
                    Ok(Some(v)) => v,
                    _ => Value::default(),
                },
            )
            .collect::<Vec<_>>()
            .into()
    }
}

impl CommandService for Hdel {
    fn execute(self, store: &impl Storage) -> CommandResponse {
        match store.del(&self.table, &self.key) {
            Ok(Some(v)) => v.into(),
            Ok(None) => Value::default().into(),
            Err(e) => e.into(),
        }
    }
}

impl CommandService for Hmdel {
    fn execute(self, store: &impl Storage) -> CommandResponse {
        self.keys
            .iter()
            .map(|key| match store.del(&self.table, key) {
                Ok(Some(v)) => v,
                _ => Value::default(),
            })
            .collect::<Vec<_>>()
            .into()
    }
}

impl CommandService for Hexist {
    fn execute(self, store: &impl Storage) -> CommandResponse {
        match store.contains(&self.table, &self.key) {
            Ok(exists) => Value::from(exists).into(),
            Err(e) => e.into(),
        }
    }
}

impl CommandService for Hmexist {
    fn execute(self, store: &impl Storage) -> CommandResponse {
        self.keys
            .iter()
            .map(|key| {
                let exists = store.contains(&self.table, key).unwrap_or_default();
                Value::from(exists)
            })
            .collect::<Vec<_>>()
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hset_should_work() {
        let store = MemTable::new();
        let cmd = CommandRequest::new_hset("t1", "hello", "world".into());
        let res = dispatch(cmd.clone(), &store);
        assert_res_ok(&res, &[Value::default()], &[]);

        let res = dispatch(cmd, &store);
        assert_res_ok(&res, &["world".into()], &[]);
    }

    #[test]
    fn hget_should_work() {
        let store = MemTable::new();
        let cmd = CommandRequest::new_hset("t1", "hello", 10.into());
        dispatch(cmd, &store);

        let cmd = CommandRequest::new_hget("t1", "hello");
        let res = dispatch(cmd, &store);
        assert_res_ok(&res, &[10.into()], &[]);
    }

    #[test]
    fn hget_no_exist_key_should_return_404() {
        let store = MemTable::new();
        let cmd = CommandRequest::new_hget("t1", "not_exist_key");
        let res = dispatch(cmd, &store);
        assert_res_error(&res, 404, "Not found");
    }

    #[test]
    fn hgetall_should_work() {
        let store = MemTable::new();
        let cmds = vec![
            CommandRequest::new_hset("score", "u1", 10.into()),
            CommandRequest::new_hset("score", "u2", 20.into()),
            CommandRequest::new_hset("score", "u3", 30.into()),
            CommandRequest::new_hset("score", "u1", 40.into()), // duplicate key, update u1's value
        ];
        for cmd in cmds {
            dispatch(cmd, &store);
        }

        let cmd = CommandRequest::new_hgetall("score");
        let res = dispatch(cmd, &store);
        assert_res_ok(
            &res,
            &[],
            &[
                Kvpair::new("u1", 40.into()), // only one u1
                Kvpair::new("u2", 20.into()),
                Kvpair::new("u3", 30.into()),
            ],
        );
    }

    #[test]
    fn hmget_should_work() {
        let store = MemTable::new();
        dispatch(CommandRequest::new_hset("t1", "k1", "v1".into()), &store);
        dispatch(CommandRequest::new_hset("t1", "k3", "v3".into()), &store);

        // missing k2 yields a null value at its position
        let cmd = CommandRequest::new_hmget(
            "t1",
            vec!["k1".into(), "k2".into(), "k3".into()],
        );
        let res = dispatch(cmd, &store);
        assert_res_ok(&res, &["v1".into(), Value::default(), "v3".into()], &[]);
    }

    #[test]
    fn hmset_should_return_prior_values_in_order() {
        let store = MemTable::new();
        dispatch(CommandRequest::new_hset("t1", "k1", "old".into()), &store);

        let pairs = vec![
            Kvpair::new("k1", "new".into()),
            Kvpair::new("k2", "v2".into()),
        ];
        let res = dispatch(CommandRequest::new_hmset("t1", pairs), &store);
        assert_res_ok(&res, &["old".into(), Value::default()], &[]);

        let res = dispatch(CommandRequest::new_hget("t1", "k1"), &store);
        assert_res_ok(&res, &["new".into()], &[]);
    }

    #[test]
    fn hdel_should_work() {
        let store = MemTable::new();
        dispatch(CommandRequest::new_hset("t1", "k1", "v1".into()), &store);

        let res = dispatch(CommandRequest::new_hdel("t1", "k1"), &store);
        assert_res_ok(&res, &["v1".into()], &[]);

        // deleting an unexisting key returns a null value
        let res = dispatch(CommandRequest::new_hdel("t1", "k1"), &store);
        assert_res_ok(&res, &[Value::default()], &[]);

        let res = dispatch(CommandRequest::new_hget("t1", "k1"), &store);
        assert_res_error(&res, 404, "Not found");
    }

    #[test]
    fn hmdel_should_work() {
        let store = MemTable::new();
        dispatch(CommandRequest::new_hset("t1", "k1", "v1".into()), &store);
        dispatch(CommandRequest::new_hset("t1", "k2", "v2".into()), &store);

        let cmd = CommandRequest::new_hmdel("t1", vec!["k1".into(), "k3".into(), "k2".into()]);
        let res = dispatch(cmd, &store);
        assert_res_ok(&res, &["v1".into(), Value::default(), "v2".into()], &[]);

        let res = dispatch(CommandRequest::new_hgetall("t1"), &store);
        assert_res_ok(&res, &[], &[]);
    }

    #[test]
    fn hexist_should_mirror_hget() {
        let store = MemTable::new();
        dispatch(CommandRequest::new_hset("t1", "k1", "v1".into()), &store);

        let res = dispatch(CommandRequest::new_hexist("t1", "k1"), &store);
        assert_res_ok(&res, &[true.into()], &[]);

        let res = dispatch(CommandRequest::new_hexist("t1", "k2"), &store);
        assert_res_ok(&res, &[false.into()], &[]);
    }

    #[test]
    fn hmexist_should_work() {
        let store = MemTable::new();
        dispatch(CommandRequest::new_hset("t1", "k1", "v1".into()), &store);

        let cmd = CommandRequest::new_hmexist("t1", vec!["k1".into(), "k2".into()]);
        let res = dispatch(cmd, &store);
        assert_res_ok(&res, &[true.into(), false.into()], &[]);
    }
}
